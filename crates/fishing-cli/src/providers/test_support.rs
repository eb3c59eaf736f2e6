//! Single-threaded HTTP responder for exercising the real request path, and
//! fixture providers for the layers above it.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use super::{FeatureApi, FeatureQuery, ForecastApi, ForecastCall, ProviderError};
use crate::model::{ForecastBaseTime, GridCell};

#[derive(Debug)]
pub struct MockResponse {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: String,
}

impl MockResponse {
    pub fn json(status: u16, reason: &'static str, body: &str) -> Self {
        Self {
            status,
            reason,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn xml(status: u16, reason: &'static str, body: &str) -> Self {
        Self {
            status,
            reason,
            content_type: "text/xml; charset=UTF-8",
            body: body.to_string(),
        }
    }
}

pub struct MockServer {
    pub base_url: String,
    request_lines: Arc<Mutex<Vec<String>>>,
    handle: thread::JoinHandle<()>,
}

impl MockServer {
    pub fn spawn(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let request_lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&request_lines);

        let handle = thread::spawn(move || {
            for response in responses {
                let start = Instant::now();
                let mut stream = loop {
                    match listener.accept() {
                        Ok((stream, _)) => break stream,
                        Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                            if start.elapsed() > Duration::from_secs(3) {
                                panic!("mock server timed out waiting for request");
                            }
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(error) => panic!("mock server accept failed: {error}"),
                    }
                };
                stream.set_nonblocking(false).expect("blocking stream");

                let cloned = stream.try_clone().expect("clone stream");
                let mut reader = BufReader::new(cloned);
                let mut first_line = None;

                loop {
                    let mut line = String::new();
                    let bytes = reader.read_line(&mut line).expect("read line");
                    if bytes == 0 || line == "\r\n" {
                        break;
                    }
                    if first_line.is_none() {
                        first_line = Some(line.trim_end_matches(['\r', '\n']).to_string());
                    }
                }

                if let Some(line) = first_line {
                    captured.lock().expect("request lock").push(line);
                }

                let response_head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    response.status,
                    response.reason,
                    response.content_type,
                    response.body.len()
                );

                stream
                    .write_all(response_head.as_bytes())
                    .and_then(|_| stream.write_all(response.body.as_bytes()))
                    .expect("write response");
            }
        });

        Self {
            base_url,
            request_lines,
            handle,
        }
    }

    /// `GET /path?query HTTP/1.1` lines in arrival order.
    pub fn request_lines(&self) -> Vec<String> {
        self.request_lines.lock().expect("request lock").clone()
    }

    pub fn join(self) {
        self.handle.join().expect("mock server thread");
    }
}

pub fn forecast_envelope(items: Value) -> Value {
    json!({
        "response": {
            "header": {"resultCode": "00", "resultMsg": "NORMAL_SERVICE"},
            "body": {"dataType": "JSON", "items": {"item": items}}
        }
    })
}

/// Small but realistic payload per call, dated around 2025-03-10 KST.
pub fn forecast_payload(call: ForecastCall) -> Value {
    match call {
        ForecastCall::UltraNow => forecast_envelope(json!([
            {"category": "T1H", "baseDate": "20250310", "baseTime": "1300", "obsrValue": "8.1"},
            {"category": "REH", "baseDate": "20250310", "baseTime": "1300", "obsrValue": "40"}
        ])),
        ForecastCall::UltraForecast => forecast_envelope(json!([
            {"category": "T1H", "fcstDate": "20250310", "fcstTime": "1300", "fcstValue": "9"},
            {"category": "SKY", "fcstDate": "20250310", "fcstTime": "1400", "fcstValue": "1"}
        ])),
        ForecastCall::Short => forecast_envelope(json!([
            {"category": "TMP", "fcstDate": "20250311", "fcstTime": "0900", "fcstValue": "6"}
        ])),
        ForecastCall::MidLand => {
            forecast_envelope(json!([{"regId": "11B00000", "rnSt4Am": 30, "wf4Am": "맑음"}]))
        }
        ForecastCall::MidTemperature => {
            forecast_envelope(json!([{"regId": "11B10101", "taMin4": 1, "taMax4": 12}]))
        }
        ForecastCall::MidSea => forecast_envelope(json!([{"regId": "12A20000", "wh4AAm": 0.5}])),
    }
}

pub fn fish_document(species: &[&str]) -> String {
    let members: String = species
        .iter()
        .map(|name| {
            format!(
                "<gml:featureMember><EcoBank:mv_map_ntee_fishes_point>\
                 <EcoBank:geom><gml:Point><gml:coordinates>198056.37,551885.03</gml:coordinates></gml:Point></EcoBank:geom>\
                 <EcoBank:spcs_korean_nm>{name}</EcoBank:spcs_korean_nm>\
                 </EcoBank:mv_map_ntee_fishes_point></gml:featureMember>"
            )
        })
        .collect();
    format!(
        "<wfs:FeatureCollection xmlns:wfs=\"http://www.opengis.net/wfs\" \
         xmlns:gml=\"http://www.opengis.net/gml\" xmlns:EcoBank=\"http://ecobank\">{members}</wfs:FeatureCollection>"
    )
}

/// Answers every forecast call from [`forecast_payload`] unless listed in
/// `failing_forecasts`, and every feature query with `fish`.
pub struct FixtureProviders {
    pub failing_forecasts: Vec<ForecastCall>,
    pub fish: Result<String, ProviderError>,
    pub forecast_calls: AtomicUsize,
    pub fish_calls: AtomicUsize,
}

impl FixtureProviders {
    pub fn healthy(species: &[&str]) -> Self {
        Self {
            failing_forecasts: Vec::new(),
            fish: Ok(fish_document(species)),
            forecast_calls: AtomicUsize::new(0),
            fish_calls: AtomicUsize::new(0),
        }
    }

    pub fn forecast_calls(&self) -> usize {
        self.forecast_calls.load(Ordering::SeqCst)
    }

    pub fn fish_calls(&self) -> usize {
        self.fish_calls.load(Ordering::SeqCst)
    }

    fn serve(&self, call: ForecastCall) -> Result<Value, ProviderError> {
        self.forecast_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_forecasts.contains(&call) {
            return Err(ProviderError::Transport(format!("kma: {} timed out", call.as_str())));
        }
        Ok(forecast_payload(call))
    }
}

impl ForecastApi for FixtureProviders {
    fn fetch_ultra_now(&self, _: GridCell, _: &ForecastBaseTime) -> Result<Value, ProviderError> {
        self.serve(ForecastCall::UltraNow)
    }

    fn fetch_ultra_forecast(
        &self,
        _: GridCell,
        _: &ForecastBaseTime,
    ) -> Result<Value, ProviderError> {
        self.serve(ForecastCall::UltraForecast)
    }

    fn fetch_short(&self, _: GridCell, _: &ForecastBaseTime) -> Result<Value, ProviderError> {
        self.serve(ForecastCall::Short)
    }

    fn fetch_mid_land(&self, _: &str, _: &ForecastBaseTime) -> Result<Value, ProviderError> {
        self.serve(ForecastCall::MidLand)
    }

    fn fetch_mid_temperature(&self, _: &str, _: &ForecastBaseTime) -> Result<Value, ProviderError> {
        self.serve(ForecastCall::MidTemperature)
    }

    fn fetch_mid_sea(&self, _: &str, _: &ForecastBaseTime) -> Result<Value, ProviderError> {
        self.serve(ForecastCall::MidSea)
    }
}

impl FeatureApi for FixtureProviders {
    fn fetch_fish_features(&self, _: &FeatureQuery) -> Result<String, ProviderError> {
        self.fish_calls.fetch_add(1, Ordering::SeqCst);
        self.fish.clone()
    }
}

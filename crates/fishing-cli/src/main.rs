use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fishing_cli::{
    config::RuntimeConfig,
    error::{AppError, ErrorKind},
    model::{Coordinate, FishRequest, ForecastRecord, WeatherRequest},
    providers::{FeatureApi, ForecastApi, HttpProviders},
    reference::ReferenceTables,
    refresh::{self, RefreshScope, RefreshSummary},
    service::{
        self, FishFeaturesOutput, FishOutput, GridOutput, RegionOutput, SpotSummary, WeatherOutput,
    },
    sky_code,
    store::{SpotFilter, SpotKind, SpotStore},
};

const LOG_ENV: &str = "FISHING_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fishing spot forecasts (KMA) and fish species observations (EcoBank)"
)]
struct Cli {
    #[arg(long, value_enum, global = true)]
    output: Option<OutputModeArg>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Three-tier forecast for a stored spot or a coordinate.
    Weather {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
        /// Address text used for mid-term region codes.
        #[arg(long)]
        address: Option<String>,
        /// Serve the forecast stored by the last refresh.
        #[arg(long)]
        cached: bool,
    },
    /// Species share around a stored spot or a coordinate.
    Fish {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// Raw fish observations around a stored spot or a coordinate.
    FishFeatures {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        lon: Option<f64>,
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// List stored spots.
    Spots {
        #[arg(long, value_enum, default_value_t = SpotKindArg::All)]
        kind: SpotKindArg,
    },
    /// Refresh forecasts and species lists of stored spots.
    Refresh {
        #[arg(long)]
        only_failed: bool,
    },
    /// Forecast grid cell and EPSG:5186 position of a coordinate.
    Grid {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// Mid-term region codes for an address and/or coordinate.
    Regions {
        #[arg(long)]
        address: Option<String>,
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,
        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
    },
}

const ENVELOPE_SCHEMA_VERSION: &str = "v1";
const ERROR_CODE_USER_OUTPUT_MODE_CONFLICT: &str = "user.output_mode_conflict";
const ERROR_CODE_RUNTIME_PROVIDER_INIT: &str = "runtime.provider_init_failed";
const ERROR_CODE_RUNTIME_SERIALIZE: &str = "runtime.serialize_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputModeArg {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SpotKindArg {
    All,
    Sea,
    Ground,
}

impl From<SpotKindArg> for SpotFilter {
    fn from(value: SpotKindArg) -> Self {
        match value {
            SpotKindArg::All => SpotFilter::All,
            SpotKindArg::Sea => SpotFilter::Sea,
            SpotKindArg::Ground => SpotFilter::Ground,
        }
    }
}

impl Cli {
    fn command_name(&self) -> &'static str {
        match &self.command {
            Commands::Weather { .. } => "fishing.weather",
            Commands::Fish { .. } => "fishing.fish",
            Commands::FishFeatures { .. } => "fishing.fish_features",
            Commands::Spots { .. } => "fishing.spots",
            Commands::Refresh { .. } => "fishing.refresh",
            Commands::Grid { .. } => "fishing.grid",
            Commands::Regions { .. } => "fishing.regions",
        }
    }

    fn output_mode_hint(&self) -> OutputModeArg {
        if self.json {
            OutputModeArg::Json
        } else {
            self.output.unwrap_or(OutputModeArg::Human)
        }
    }
}

fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let command = cli.command_name();
    let output_mode = cli.output_mode_hint();
    match run(cli) {
        Ok(output) => println!("{output}"),
        Err(error) => {
            emit_error(command, output_mode, &error);
            std::process::exit(error.exit_code());
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<String, AppError> {
    let config = RuntimeConfig::from_env();
    let providers = HttpProviders::new(&config).map_err(|error| {
        AppError::runtime(error.to_string()).with_code(ERROR_CODE_RUNTIME_PROVIDER_INIT)
    })?;
    run_with(cli, &config, &providers, Utc::now)
}

fn run_with<P, N>(
    cli: Cli,
    config: &RuntimeConfig,
    providers: &P,
    now_fn: N,
) -> Result<String, AppError>
where
    P: ForecastApi + FeatureApi + Sync,
    N: Fn() -> DateTime<Utc>,
{
    let output_mode = resolve_output_mode(cli.output, cli.json)?;
    let command = cli.command_name();

    match cli.command {
        Commands::Weather {
            name,
            lat,
            lon,
            address,
            cached,
        } => {
            let request =
                WeatherRequest::new(name.as_deref(), lat, lon, address.as_deref(), cached)?;
            let tables = ReferenceTables::load(config.reference_dir.as_deref())?;
            let store = SpotStore::load(&config.spot_file)?;
            let output = service::resolve_weather(&store, &tables, providers, now_fn, &request)?;
            render(command, output_mode, &output, format_weather)
        }
        Commands::Fish {
            name,
            lat,
            lon,
            radius_km,
        } => {
            let request = FishRequest::new(name.as_deref(), lat, lon, radius_km)?;
            let store = SpotStore::load(&config.spot_file)?;
            let output = service::resolve_fish(config, &store, providers, &request)?;
            render(command, output_mode, &output, format_fish)
        }
        Commands::FishFeatures {
            name,
            lat,
            lon,
            radius_km,
        } => {
            let request = FishRequest::new(name.as_deref(), lat, lon, radius_km)?;
            let store = SpotStore::load(&config.spot_file)?;
            let output = service::resolve_fish_features(config, &store, providers, &request)?;
            render(command, output_mode, &output, format_fish_features)
        }
        Commands::Spots { kind } => {
            let store = SpotStore::load(&config.spot_file)?;
            let output = service::list_spots(&store, kind.into());
            render(command, output_mode, &output, |spots| format_spots(spots))
        }
        Commands::Refresh { only_failed } => {
            let scope = if only_failed {
                RefreshScope::OnlyFailed
            } else {
                RefreshScope::All
            };
            let tables = ReferenceTables::load(config.reference_dir.as_deref())?;
            let mut store = SpotStore::load(&config.spot_file)?;
            let summary = refresh::refresh_spots(
                &mut store,
                providers,
                &tables,
                config,
                scope,
                now_fn,
                std::thread::sleep,
            );
            store.save(&config.spot_file)?;
            render(command, output_mode, &summary, format_refresh)
        }
        Commands::Grid { lat, lon } => {
            let output = service::grid_for(Coordinate::new(lat, lon)?);
            render(command, output_mode, &output, format_grid)
        }
        Commands::Regions { address, lat, lon } => {
            let coordinate = match (lat, lon) {
                (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)?),
                _ => None,
            };
            let tables = ReferenceTables::load(config.reference_dir.as_deref())?;
            let output = service::resolve_regions(&tables, address.as_deref(), coordinate)?;
            render(command, output_mode, &output, format_regions)
        }
    }
}

fn resolve_output_mode(
    output: Option<OutputModeArg>,
    json_flag: bool,
) -> Result<OutputModeArg, AppError> {
    match (output, json_flag) {
        (Some(OutputModeArg::Human), true) => Err(AppError::user(
            "conflicting output flags: --json requires --output json (got human)",
        )
        .with_code(ERROR_CODE_USER_OUTPUT_MODE_CONFLICT)),
        (Some(mode), _) => Ok(mode),
        (None, true) => Ok(OutputModeArg::Json),
        (None, false) => Ok(OutputModeArg::Human),
    }
}

fn render<T, F>(
    command: &str,
    output_mode: OutputModeArg,
    output: &T,
    format_human: F,
) -> Result<String, AppError>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    match output_mode {
        OutputModeArg::Json => render_json_envelope(command, output),
        OutputModeArg::Human => Ok(format_human(output)),
    }
}

fn render_json_envelope<T: Serialize + ?Sized>(command: &str, output: &T) -> Result<String, AppError> {
    let result = serde_json::to_value(output).map_err(|error| {
        AppError::runtime(format!("failed to serialize output: {error}"))
            .with_code(ERROR_CODE_RUNTIME_SERIALIZE)
    })?;
    serde_json::to_string(&json!({
        "schema_version": ENVELOPE_SCHEMA_VERSION,
        "command": command,
        "ok": true,
        "result": result,
    }))
    .map_err(|error| {
        AppError::runtime(format!("failed to serialize output envelope: {error}"))
            .with_code(ERROR_CODE_RUNTIME_SERIALIZE)
    })
}

fn emit_error(command: &str, output_mode: OutputModeArg, error: &AppError) {
    match output_mode {
        OutputModeArg::Json => {
            let payload = json!({
                "schema_version": ENVELOPE_SCHEMA_VERSION,
                "command": command,
                "ok": false,
                "error": {
                    "code": error.code,
                    "message": redact_sensitive(&error.message),
                    "details": {
                        "kind": error_kind_label(error.kind),
                        "exit_code": error.exit_code(),
                    }
                }
            });
            let rendered = serde_json::to_string(&payload).unwrap_or_else(|serialize_error| {
                format!(
                    "{{\"schema_version\":\"{}\",\"command\":\"{}\",\"ok\":false,\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
                    ENVELOPE_SCHEMA_VERSION,
                    command,
                    ERROR_CODE_RUNTIME_SERIALIZE,
                    escape_json_string(&format!(
                        "failed to serialize error envelope: {serialize_error}"
                    )),
                )
            });
            println!("{rendered}");
        }
        OutputModeArg::Human => {
            eprintln!(
                "error[{}]: {}",
                error.code,
                redact_sensitive(&error.message)
            );
        }
    }
}

fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::User => "user",
        ErrorKind::Runtime => "runtime",
    }
}

/// Masks credential values that might leak through upstream error text.
fn redact_sensitive(input: &str) -> String {
    let mut output = input.to_string();
    for pattern in ["servicekey=", "service_key=", "api_key=", "apikey=", "token=", "secret="] {
        output = redact_after_pattern(&output, pattern);
    }
    output
}

fn redact_after_pattern(input: &str, pattern: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(pattern) {
        let value_start = cursor + found + pattern.len();
        let value_end = find_value_end(input, value_start);

        output.push_str(&input[cursor..value_start]);
        if value_start < value_end {
            output.push_str("[REDACTED]");
        }
        cursor = value_end;
    }

    output.push_str(&input[cursor..]);
    output
}

fn find_value_end(input: &str, mut index: usize) -> usize {
    let bytes = input.as_bytes();
    while index < bytes.len() {
        let byte = bytes[index];
        if byte.is_ascii_whitespace() || matches!(byte, b'&' | b',' | b';' | b')' | b']' | b'}') {
            break;
        }
        index += 1;
    }
    index
}

fn escape_json_string(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c < '\u{20}' => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}

fn location_label(spot: Option<&str>, coordinate: Coordinate) -> String {
    match spot {
        Some(name) => format!("{name} ({:.4}, {:.4})", coordinate.lat, coordinate.lon),
        None => format!("{:.4}, {:.4}", coordinate.lat, coordinate.lon),
    }
}

fn code_label(code: Option<&str>) -> &str {
    code.unwrap_or("-")
}

fn format_weather(output: &WeatherOutput) -> String {
    let source = match output.source {
        service::WeatherSource::Live => "live",
        service::WeatherSource::Cached => "cached",
    };
    let mut lines = vec![
        format!(
            "{} | grid={},{} | source={source}",
            location_label(output.spot.as_deref(), output.coordinate),
            output.grid.nx,
            output.grid.ny,
        ),
        format!(
            "regions land={} temp={} sea={}",
            code_label(output.regions.land.as_deref()),
            code_label(output.regions.temp.as_deref()),
            code_label(output.regions.sea.as_deref()),
        ),
    ];

    let tiers: [(&str, &ForecastRecord); 5] = [
        ("ultra", &output.forecast.ultra),
        ("short", &output.forecast.short),
        ("mid.land", &output.forecast.mid.land),
        ("mid.ta", &output.forecast.mid.ta),
        ("mid.sea", &output.forecast.mid.sea),
    ];
    for (label, record) in tiers {
        lines.push(format!("[{label}]"));
        if record.is_empty() {
            lines.push("  (no data)".to_string());
        }
        for (key, fields) in record {
            let values = fields
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            match sky_code::condition(fields) {
                Some(condition) => lines.push(format!("  {key} {condition} | {values}")),
                None => lines.push(format!("  {key} {values}")),
            }
        }
    }

    for tier in output.tiers.iter().filter(|tier| tier.error.is_some()) {
        lines.push(format!(
            "! {} failed: {}",
            tier.call.as_str(),
            redact_sensitive(tier.error.as_deref().unwrap_or_default())
        ));
    }

    lines.join("\n")
}

fn format_fish(output: &FishOutput) -> String {
    let mut lines = vec![format!(
        "{} | radius={}km | observations={}",
        location_label(output.spot.as_deref(), output.coordinate),
        output.radius_km,
        output.feature_count
    )];

    if output.distribution.is_empty() {
        lines.push("no species observed".to_string());
    }
    for share in &output.distribution {
        lines.push(format!("{} {}%", share.species, share.percent));
    }
    for entry in &output.trace {
        lines.push(format!("! {}", redact_sensitive(entry)));
    }

    lines.join("\n")
}

fn format_fish_features(output: &FishFeaturesOutput) -> String {
    let mut lines = vec![format!(
        "{} | bbox={} | features={}",
        location_label(output.spot.as_deref(), output.coordinate),
        output.bbox,
        output.features.len()
    )];

    for feature in &output.features {
        let position = feature
            .geometry
            .map(|point| format!("{:.1},{:.1}", point.x, point.y))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "{} {} {} @ {position}",
            feature.observed_year.as_deref().unwrap_or("----"),
            feature
                .species_name
                .as_deref()
                .unwrap_or(fishing_cli::fish::UNNAMED_SPECIES),
            feature.area_name.as_deref().unwrap_or("-"),
        ));
    }

    lines.join("\n")
}

fn format_spots(spots: &[SpotSummary]) -> String {
    if spots.is_empty() {
        return "no stored spots".to_string();
    }

    spots
        .iter()
        .map(|spot| {
            let kind = match spot.kind {
                SpotKind::Sea => "sea",
                SpotKind::Ground => "ground",
            };
            format!(
                "{} [{kind}] {:.4},{:.4} weather={} fish={}",
                spot.name, spot.lat, spot.lon, spot.weather, spot.fish
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_refresh(summary: &RefreshSummary) -> String {
    format!(
        "refreshed {} spots | weather ok={} failed={} | fish ok={} failed={}",
        summary.total,
        summary.weather_ok,
        summary.weather_failed,
        summary.fish_ok,
        summary.fish_failed
    )
}

fn format_grid(output: &GridOutput) -> String {
    format!(
        "nx={} ny={} | epsg5186 x={:.2} y={:.2}",
        output.grid.nx, output.grid.ny, output.central_belt.x, output.central_belt.y
    )
}

fn format_regions(output: &RegionOutput) -> String {
    let mut line = format!(
        "land={} temp={} sea={}",
        code_label(output.codes.land.as_deref()),
        code_label(output.codes.temp.as_deref()),
        code_label(output.codes.sea.as_deref()),
    );
    if let Some(area) = &output.grid_area {
        line.push_str(&format!(" | grid area={area}"));
    }
    line
}

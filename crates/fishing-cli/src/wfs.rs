//! Parser for the feature service's WFS `FeatureCollection` documents.
//!
//! The upstream prefixes feature tags inconsistently (`EcoBank:`, `ms:`, or
//! none), so a member's feature element is recognised by a suffix match on
//! the requested type name and attributes by their local name.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use crate::model::{FishFeature, Point};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeatureParseError {
    #[error("malformed feature document at byte {position}: {message}")]
    Xml { position: usize, message: String },
    #[error("feature document has no root element")]
    Empty,
    #[error("feature document ended before its root element closed")]
    Truncated,
    #[error("feature service exception: {0}")]
    ServiceException(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    SpeciesId,
    ObservedYear,
    SpeciesName,
    AreaName,
    BeginDate,
    EndDate,
}

impl Attribute {
    fn from_local_name(name: &str) -> Option<Self> {
        match name {
            "spce_id" => Some(Self::SpeciesId),
            "examin_year" => Some(Self::ObservedYear),
            "spcs_korean_nm" => Some(Self::SpeciesName),
            "examin_area_nm" => Some(Self::AreaName),
            "examin_begin_de" => Some(Self::BeginDate),
            "examin_end_de" => Some(Self::EndDate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Attribute(Attribute),
    Coordinates,
    Pos,
}

struct OpenFeature {
    depth: usize,
    record: FishFeature,
    coordinates: Option<String>,
    pos: Option<String>,
}

struct Collector<'t> {
    type_name: &'t str,
    depth: usize,
    root_seen: bool,
    exception: Option<String>,
    member_depth: Option<usize>,
    feature: Option<OpenFeature>,
    target: Option<(Target, usize)>,
    text: String,
    features: Vec<FishFeature>,
}

impl<'t> Collector<'t> {
    fn new(type_name: &'t str) -> Self {
        Self {
            type_name,
            depth: 0,
            root_seen: false,
            exception: None,
            member_depth: None,
            feature: None,
            target: None,
            text: String::new(),
            features: Vec::new(),
        }
    }

    fn open(&mut self, element: &BytesStart<'_>) {
        self.depth += 1;
        let local = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();

        if !self.root_seen {
            self.root_seen = true;
            if local.ends_with("ExceptionReport") {
                self.exception = Some(String::new());
            }
            return;
        }

        if let Some(feature) = &self.feature {
            if self.target.is_some() {
                return;
            }
            let target = if local == "coordinates" {
                Some(Target::Coordinates)
            } else if local == "pos" {
                Some(Target::Pos)
            } else if self.depth == feature.depth + 1 {
                Attribute::from_local_name(&local).map(Target::Attribute)
            } else {
                None
            };
            if let Some(target) = target {
                self.target = Some((target, self.depth));
                self.text.clear();
            }
            return;
        }

        match self.member_depth {
            Some(member_depth) if self.depth == member_depth + 1 => {
                let qualified = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                if qualified.ends_with(self.type_name) {
                    self.feature = Some(OpenFeature {
                        depth: self.depth,
                        record: FishFeature::default(),
                        coordinates: None,
                        pos: None,
                    });
                }
            }
            Some(_) => {}
            None => {
                if local == "featureMember" || local == "featureMembers" {
                    self.member_depth = Some(self.depth);
                }
            }
        }
    }

    fn close(&mut self) {
        let depth = self.depth;
        self.depth = self.depth.saturating_sub(1);

        if let Some((target, target_depth)) = self.target {
            if target_depth == depth {
                self.target = None;
                let value = self.text.trim().to_string();
                self.text.clear();
                if let Some(feature) = self.feature.as_mut() {
                    assign(feature, target, value);
                }
            }
            return;
        }

        if self.feature.as_ref().is_some_and(|feature| feature.depth == depth) {
            if let Some(feature) = self.feature.take() {
                self.features.push(finish(feature));
            }
            return;
        }

        if self.member_depth == Some(depth) {
            self.member_depth = None;
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(exception) = self.exception.as_mut() {
            if !exception.is_empty() {
                exception.push(' ');
            }
            exception.push_str(text.trim());
            return;
        }
        if self.target.is_some() {
            self.text.push_str(text);
        }
    }
}

fn assign(feature: &mut OpenFeature, target: Target, value: String) {
    let value = (!value.is_empty()).then_some(value);
    let record = &mut feature.record;
    match target {
        Target::Attribute(Attribute::SpeciesId) => record.species_id = value,
        Target::Attribute(Attribute::ObservedYear) => record.observed_year = value,
        Target::Attribute(Attribute::SpeciesName) => record.species_name = value,
        Target::Attribute(Attribute::AreaName) => record.area_name = value,
        Target::Attribute(Attribute::BeginDate) => record.begin_date = value,
        Target::Attribute(Attribute::EndDate) => record.end_date = value,
        Target::Coordinates => {
            feature.coordinates.get_or_insert_with(|| value.unwrap_or_default());
        }
        Target::Pos => {
            feature.pos.get_or_insert_with(|| value.unwrap_or_default());
        }
    }
}

fn finish(feature: OpenFeature) -> FishFeature {
    let geometry = feature
        .coordinates
        .as_deref()
        .and_then(|text| parse_pair(text.split(',')))
        .or_else(|| {
            feature
                .pos
                .as_deref()
                .and_then(|text| parse_pair(text.split_whitespace()))
        });

    FishFeature {
        geometry,
        ..feature.record
    }
}

fn parse_pair<'a>(mut parts: impl Iterator<Item = &'a str>) -> Option<Point> {
    let x = parts.next()?.trim().parse::<f64>().ok()?;
    let y = parts.next()?.trim().parse::<f64>().ok()?;
    (x.is_finite() && y.is_finite()).then_some(Point { x, y })
}

/// Extracts one record per feature member whose element name ends with
/// `type_name`. Bad geometry yields `geometry: None`; only a document that
/// cannot be read as XML fails.
pub fn parse_features(xml: &str, type_name: &str) -> Result<Vec<FishFeature>, FeatureParseError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut collector = Collector::new(type_name);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => collector.open(&element),
            Ok(Event::Empty(element)) => {
                collector.open(&element);
                collector.close();
            }
            Ok(Event::End(_)) => collector.close(),
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|error| FeatureParseError::Xml {
                    position: reader.buffer_position(),
                    message: error.to_string(),
                })?;
                collector.push_text(&text);
            }
            Ok(Event::CData(data)) => {
                let raw = data.into_inner();
                collector.push_text(&String::from_utf8_lossy(&raw));
            }
            Ok(Event::Eof) => break,
            Err(error) => {
                return Err(FeatureParseError::Xml {
                    position: reader.buffer_position(),
                    message: error.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }

    if !collector.root_seen {
        return Err(FeatureParseError::Empty);
    }
    if collector.depth != 0 {
        return Err(FeatureParseError::Truncated);
    }
    if let Some(message) = collector.exception {
        return Err(FeatureParseError::ServiceException(message));
    }

    Ok(collector.features)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TYPE_NAME: &str = "mv_map_ntee_fishes_point";

    fn member(prefix: &str, name: &str, coordinates: &str) -> String {
        format!(
            r#"<gml:featureMember>
                <{prefix}mv_map_ntee_fishes_point fid="f.1">
                    <{prefix}geom><gml:Point srsName="EPSG:5186"><gml:coordinates>{coordinates}</gml:coordinates></gml:Point></{prefix}geom>
                    <{prefix}spce_id>F0123</{prefix}spce_id>
                    <{prefix}examin_year>2019</{prefix}examin_year>
                    <{prefix}spcs_korean_nm>{name}</{prefix}spcs_korean_nm>
                    <{prefix}examin_area_nm>한강 하류</{prefix}examin_area_nm>
                    <{prefix}examin_begin_de>20190501</{prefix}examin_begin_de>
                    <{prefix}examin_end_de/>
                </{prefix}mv_map_ntee_fishes_point>
            </gml:featureMember>"#
        )
    }

    fn collection(members: &[String]) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs" xmlns:gml="http://www.opengis.net/gml" xmlns:EcoBank="http://ecobank">
                <gml:boundedBy><gml:null>unknown</gml:null></gml:boundedBy>
                {}
            </wfs:FeatureCollection>"#,
            members.concat()
        )
    }

    #[test]
    fn wfs_parses_feature_attributes_and_geometry() {
        let xml = collection(&[member("EcoBank:", "붕어", "198056.37,551885.03")]);

        let features = parse_features(&xml, TYPE_NAME).expect("features");
        assert_eq!(
            features,
            vec![FishFeature {
                species_id: Some("F0123".to_string()),
                species_name: Some("붕어".to_string()),
                observed_year: Some("2019".to_string()),
                area_name: Some("한강 하류".to_string()),
                begin_date: Some("20190501".to_string()),
                end_date: None,
                geometry: Some(Point {
                    x: 198056.37,
                    y: 551885.03
                }),
            }]
        );
    }

    #[test]
    fn wfs_matches_feature_tag_by_suffix_regardless_of_prefix() {
        let xml = collection(&[
            member("EcoBank:", "붕어", "1,2"),
            member("", "잉어", "3,4"),
            member("ms:", "피라미", "5,6"),
        ]);

        let names: Vec<_> = parse_features(&xml, TYPE_NAME)
            .expect("features")
            .into_iter()
            .map(|feature| feature.species_name.unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["붕어", "잉어", "피라미"]);
    }

    #[test]
    fn wfs_bad_geometry_keeps_record_without_point() {
        let xml = collection(&[
            member("EcoBank:", "메기", "not-a-number,1"),
            member("EcoBank:", "쏘가리", "123.0"),
        ]);

        let features = parse_features(&xml, TYPE_NAME).expect("features");
        assert_eq!(features.len(), 2);
        assert!(features.iter().all(|feature| feature.geometry.is_none()));
        assert_eq!(features[0].species_name.as_deref(), Some("메기"));
    }

    #[test]
    fn wfs_reads_gml3_pos_when_coordinates_absent() {
        let xml = collection(&[r#"<gml:featureMember><EcoBank:mv_map_ntee_fishes_point>
                <EcoBank:geom><gml:Point><gml:pos>10.5 20.25</gml:pos></gml:Point></EcoBank:geom>
                <EcoBank:spcs_korean_nm>누치</EcoBank:spcs_korean_nm>
            </EcoBank:mv_map_ntee_fishes_point></gml:featureMember>"#
            .to_string()]);

        let features = parse_features(&xml, TYPE_NAME).expect("features");
        assert_eq!(features[0].geometry, Some(Point { x: 10.5, y: 20.25 }));
    }

    #[test]
    fn wfs_skips_members_of_other_feature_types() {
        let xml = collection(&[
            r#"<gml:featureMember><EcoBank:mv_map_ecpe_birds_point><EcoBank:spcs_korean_nm>백로</EcoBank:spcs_korean_nm></EcoBank:mv_map_ecpe_birds_point></gml:featureMember>"#
                .to_string(),
            member("EcoBank:", "붕어", "1,2"),
        ]);

        let features = parse_features(&xml, TYPE_NAME).expect("features");
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].species_name.as_deref(), Some("붕어"));
    }

    #[test]
    fn wfs_empty_collection_yields_no_features() {
        let features = parse_features(&collection(&[]), TYPE_NAME).expect("features");
        assert!(features.is_empty());
    }

    #[test]
    fn wfs_reports_mismatched_tags_as_hard_error() {
        let xml = "<wfs:FeatureCollection><gml:featureMember></wfs:FeatureCollection>";
        let error = parse_features(xml, TYPE_NAME).expect_err("must fail");
        assert!(matches!(error, FeatureParseError::Xml { .. }));
    }

    #[test]
    fn wfs_reports_truncated_and_empty_documents() {
        let truncated = parse_features("<wfs:FeatureCollection><gml:featureMember>", TYPE_NAME);
        assert!(matches!(
            truncated,
            Err(FeatureParseError::Truncated | FeatureParseError::Xml { .. })
        ));
        assert_eq!(parse_features("  ", TYPE_NAME), Err(FeatureParseError::Empty));
    }

    #[test]
    fn wfs_surfaces_service_exception_text() {
        let xml = r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows">
            <ows:Exception exceptionCode="InvalidParameterValue">
                <ows:ExceptionText>Unknown typeName</ows:ExceptionText>
            </ows:Exception>
        </ows:ExceptionReport>"#;

        assert_eq!(
            parse_features(xml, TYPE_NAME),
            Err(FeatureParseError::ServiceException(
                "Unknown typeName".to_string()
            ))
        );
    }
}

//! Feature ingestion adapter.
//!
//! Analysis caches disagree on field names, units and number encodings.
//! Everything loosely typed stops here: a [`RawAnalysisRecord`] either
//! becomes a validated [`TrackProfile`] or a [`MissingFeatureError`] naming
//! the mandatory field that could not be recovered. Nothing partially valid
//! travels further.

use crate::batch::BatchControl;
use crate::camelot::{CamelotKey, Mode};
use crate::error::{Feature, MissingFeatureError, PhraseAmbiguity, Result};
use crate::profile::{CueSlot, PhraseKind, PhraseMap, TrackProfile};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// A number that may arrive as a JSON number or as a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Number(f64),
    Text(String),
}

impl Loose {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().trim_end_matches(|c: char| c.is_ascii_alphabetic()).trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }

    fn describe(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => format!("`{s}`"),
        }
    }
}

impl From<f64> for Loose {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Spectral bands as a plain vector or as named bands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpectralBands {
    List(Vec<f64>),
    /// Ordered by band name so the vector layout is stable
    Named(BTreeMap<String, f64>),
}

/// Tags as a list or as one comma/semicolon separated string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tags {
    List(Vec<String>),
    Joined(String),
}

/// One analysis record as found in a feature cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnalysisRecord {
    #[serde(alias = "track_id")]
    pub id: Option<String>,
    #[serde(alias = "file_path", alias = "location")]
    pub path: Option<String>,
    #[serde(alias = "name")]
    pub title: Option<String>,
    pub artist: Option<String>,
    #[serde(alias = "tempo", alias = "average_bpm")]
    pub bpm: Option<Loose>,
    /// Key notation, or a bare Camelot number read together with `mode`
    #[serde(
        default,
        deserialize_with = "text_or_number",
        alias = "camelot",
        alias = "key_camelot",
        alias = "initial_key",
        alias = "tonality"
    )]
    pub key: Option<String>,
    #[serde(alias = "scale", alias = "key_mode", alias = "key_scale")]
    pub mode: Option<String>,
    #[serde(alias = "length", alias = "duration_secs", alias = "total_time")]
    pub duration: Option<Loose>,
    pub duration_ms: Option<Loose>,
    pub energy: Option<Loose>,
    /// `unit` (0-1) or `percent` (0-100); detected per source when absent
    pub energy_scale: Option<String>,
    pub onset_density: Option<Loose>,
    pub vocal_ratio: Option<Loose>,
    pub busy_score: Option<Loose>,
    pub spectral_bands: Option<SpectralBands>,
    #[serde(alias = "swing_dna", alias = "swing_signature")]
    pub swing: Option<Loose>,
    #[serde(alias = "tonal_mid")]
    pub tonal_balance_mid: Option<Loose>,
    #[serde(alias = "timbre")]
    pub timbre_complexity: Option<Loose>,
    #[serde(alias = "genre_tags")]
    pub tags: Option<Tags>,
    #[serde(alias = "phrases", alias = "phrase_structure")]
    pub structure: Option<BTreeMap<String, Vec<Loose>>>,
    /// `seconds` (default), `beats` or `bars`
    pub structure_unit: Option<String>,
    #[serde(alias = "mix_in_point")]
    pub mix_in: Option<Loose>,
    #[serde(alias = "mix_out_point")]
    pub mix_out: Option<Loose>,
    #[serde(alias = "hotcues")]
    pub manual_cues: Option<BTreeMap<String, Loose>>,
    pub exit_bars: Option<Loose>,
    #[serde(alias = "anchor", alias = "first_beat")]
    pub grid_offset: Option<Loose>,
    /// Fields whose values could not be decoded, with the reason
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unreadable: BTreeMap<String, String>,
}

/// Field name used in `unreadable` when the record as a whole is unusable
pub const WHOLE_RECORD: &str = "<record>";

fn text_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Integer(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    }))
}

impl RawAnalysisRecord {
    /// Decode one record field by field.
    ///
    /// A value of the wrong type costs only its own field: it is moved to
    /// `unreadable` and the rest of the record is kept. Ingestion turns an
    /// unreadable mandatory field into a [`MissingFeatureError`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => return Self::unusable(None, format!("expected an object, found `{other}`")),
        };
        if let Ok(record) = serde_json::from_value(Value::Object(fields.clone())) {
            return record;
        }

        let mut unreadable = BTreeMap::new();
        let names: Vec<String> = fields.keys().cloned().collect();
        for name in names {
            let Some(value) = fields.get(&name) else { continue };
            let single: Map<String, Value> = [(name.clone(), value.clone())].into_iter().collect();
            if let Err(err) = serde_json::from_value::<Self>(Value::Object(single)) {
                if let Some(value) = fields.remove(&name) {
                    debug!("Unreadable field `{name}` = {value}: {err}");
                    unreadable.insert(name, format!("unreadable value {value}"));
                }
            }
        }

        let id = ["id", "track_id"]
            .iter()
            .find_map(|name| fields.get(*name).and_then(Value::as_str))
            .map(str::to_string);
        let mut record = match serde_json::from_value::<Self>(Value::Object(fields)) {
            Ok(record) => record,
            Err(err) => Self::unusable(id, err.to_string()),
        };
        record.unreadable.extend(unreadable);
        record
    }

    /// A record that carries nothing but the reason it could not be read
    #[must_use]
    pub fn unusable(id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            id,
            unreadable: BTreeMap::from([(WHOLE_RECORD.to_string(), reason.into())]),
            ..Self::default()
        }
    }
}

/// The mandatory feature a raw field name feeds, if any
fn mandatory_feature(field: &str) -> Option<Feature> {
    match field {
        "id" | "track_id" | "path" | "file_path" | "location" => Some(Feature::Id),
        "bpm" | "tempo" | "average_bpm" => Some(Feature::Bpm),
        "key" | "camelot" | "key_camelot" | "initial_key" | "tonality" | "mode" | "scale" | "key_mode"
        | "key_scale" => Some(Feature::Key),
        "duration" | "length" | "duration_secs" | "total_time" | "duration_ms" => Some(Feature::Duration),
        _ => None,
    }
}

/// How a source encodes energy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyScale {
    /// 0-1, rescaled to 0-100
    Unit,
    /// Already 0-100
    Percent,
}

impl EnergyScale {
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "unit" | "0-1" | "fraction" | "normalized" | "normalised" => Some(Self::Unit),
            "percent" | "0-100" | "percentage" => Some(Self::Percent),
            _ => None,
        }
    }

    /// Decide the scale once for a whole source. A source is on the 0-1
    /// scale only when none of its energy values exceeds 1.
    #[must_use]
    pub fn detect(records: &[RawAnalysisRecord]) -> Self {
        let above_one = records
            .iter()
            .filter(|record| record.energy_scale.is_none())
            .filter_map(|record| optional(record.energy.as_ref()))
            .any(|energy| energy > 1.0);
        if above_one { Self::Percent } else { Self::Unit }
    }

    fn apply(self, raw: f64) -> f64 {
        let scaled = match self {
            Self::Unit => raw * 100.0,
            Self::Percent => raw,
        };
        scaled.clamp(0.0, 100.0)
    }
}

/// Profile plus the advisory notices raised while building it
#[derive(Debug, Clone)]
pub struct Ingested {
    pub profile: TrackProfile,
    pub notices: Vec<PhraseAmbiguity>,
}

/// Normalise one record into a profile.
///
/// # Errors
///
/// Returns [`MissingFeatureError`] when id, bpm, key or duration is absent
/// or unusable.
pub fn ingest_record(record: &RawAnalysisRecord) -> std::result::Result<TrackProfile, MissingFeatureError> {
    let ingested = ingest_record_with_notices(record)?;
    for notice in &ingested.notices {
        warn!("{notice}");
    }
    Ok(ingested.profile)
}

/// Like [`ingest_record`] but hands back phrase notices instead of logging them.
///
/// Energy scale is decided from this record alone; use [`ingest_records`]
/// to decide it across a whole source.
///
/// # Errors
///
/// See [`ingest_record`].
pub fn ingest_record_with_notices(
    record: &RawAnalysisRecord,
) -> std::result::Result<Ingested, MissingFeatureError> {
    ingest_scaled(record, EnergyScale::detect(std::slice::from_ref(record)))
}

fn ingest_scaled(
    record: &RawAnalysisRecord,
    source_scale: EnergyScale,
) -> std::result::Result<Ingested, MissingFeatureError> {
    let id = record
        .id
        .as_deref()
        .or(record.path.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| missing(record, "<unknown>", Feature::Id))?
        .to_string();
    if let Some(reason) = record.unreadable.get(WHOLE_RECORD) {
        return Err(MissingFeatureError::new(&id, Feature::Id).with_detail(reason.clone()));
    }

    let bpm = required_positive(record, &id, Feature::Bpm, record.bpm.as_ref())?;
    let key = parse_key(record, &id)?;
    let duration = match (&record.duration, &record.duration_ms) {
        (Some(seconds), _) => required_positive(record, &id, Feature::Duration, Some(seconds))?,
        (None, Some(ms)) => required_positive(record, &id, Feature::Duration, Some(ms))? / 1000.0,
        (None, None) => return Err(missing(record, &id, Feature::Duration)),
    };

    let mut notices: Vec<PhraseAmbiguity> = record
        .unreadable
        .iter()
        .filter(|(field, _)| mandatory_feature(field).is_none())
        .map(|(field, reason)| PhraseAmbiguity {
            track_id: id.clone(),
            detail: format!("field `{field}` ignored: {reason}"),
        })
        .collect();

    let energy_scale = match record.energy_scale.as_deref() {
        Some(label) => EnergyScale::from_label(label).unwrap_or_else(|| {
            notices.push(PhraseAmbiguity {
                track_id: id.clone(),
                detail: format!("unknown energy scale `{label}`, using the source scale"),
            });
            source_scale
        }),
        None => source_scale,
    };

    let grid_offset = optional(record.grid_offset.as_ref()).unwrap_or(0.0).max(0.0);
    let phrases = record
        .structure
        .as_ref()
        .map(|structure| {
            normalize_structure(&id, structure, record.structure_unit.as_deref(), bpm, grid_offset, duration, &mut notices)
        })
        .filter(|map| !map.is_empty());

    let profile = TrackProfile {
        title: record.title.clone().unwrap_or_else(|| id.clone()),
        artist: record.artist.clone().unwrap_or_default(),
        path: record.path.clone(),
        bpm,
        key,
        energy: optional(record.energy.as_ref()).map(|raw| energy_scale.apply(raw)),
        duration,
        onset_density: optional(record.onset_density.as_ref()),
        vocal_ratio: optional(record.vocal_ratio.as_ref()).map(|v| v.clamp(0.0, 1.0)),
        busy_score: optional(record.busy_score.as_ref()),
        spectral_bands: match &record.spectral_bands {
            Some(SpectralBands::List(values)) => values.iter().copied().filter(|v| v.is_finite()).collect(),
            Some(SpectralBands::Named(bands)) => bands.values().copied().filter(|v| v.is_finite()).collect(),
            None => Vec::new(),
        },
        swing: optional(record.swing.as_ref()),
        tonal_balance_mid: optional(record.tonal_balance_mid.as_ref()),
        timbre_complexity: optional(record.timbre_complexity.as_ref()),
        tags: normalize_tags(record.tags.as_ref()),
        phrases,
        mix_in_estimate: optional(record.mix_in.as_ref()).filter(|t| (0.0..duration).contains(t)),
        mix_out_estimate: optional(record.mix_out.as_ref()).filter(|t| (0.0..duration).contains(t)),
        manual_cues: normalize_cues(&id, record.manual_cues.as_ref(), &mut notices),
        exit_bars: optional(record.exit_bars.as_ref())
            .filter(|bars| *bars >= 1.0)
            .map(|bars| bars.round() as u32),
        grid_offset,
        id,
    };

    debug!("Ingested {} ({} BPM, {})", profile.id, profile.bpm, profile.key);
    Ok(Ingested { profile, notices })
}

/// Missing-feature error that carries the decode failure when the field
/// was present but unreadable.
fn missing(record: &RawAnalysisRecord, id: &str, field: Feature) -> MissingFeatureError {
    let reasons: Vec<String> = record
        .unreadable
        .iter()
        .filter(|(name, _)| name.as_str() == WHOLE_RECORD || mandatory_feature(name) == Some(field))
        .map(|(name, reason)| format!("`{name}`: {reason}"))
        .collect();
    let err = MissingFeatureError::new(id, field);
    if reasons.is_empty() { err } else { err.with_detail(reasons.join(", ")) }
}

fn required_positive(
    record: &RawAnalysisRecord,
    id: &str,
    field: Feature,
    value: Option<&Loose>,
) -> std::result::Result<f64, MissingFeatureError> {
    let raw = value.ok_or_else(|| missing(record, id, field))?;
    match raw.as_f64() {
        Some(v) if v > 0.0 => Ok(v),
        _ => Err(MissingFeatureError::new(id, field)
            .with_detail(format!("{} is not a positive number", raw.describe()))),
    }
}

fn parse_mode(raw: &str) -> Option<Mode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "minor" | "min" | "m" | "a" | "0" => Some(Mode::A),
        "major" | "maj" | "b" | "1" => Some(Mode::B),
        _ => None,
    }
}

/// Key notation on its own, or combined with a separate mode field. A bare
/// Camelot number needs the mode to name a key.
fn parse_key(record: &RawAnalysisRecord, id: &str) -> std::result::Result<CamelotKey, MissingFeatureError> {
    let raw_key = record
        .key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| missing(record, id, Feature::Key))?;
    let mode = record.mode.as_deref().and_then(parse_mode);

    let with_mode = mode.and_then(|mode| {
        let word = if mode == Mode::A { "minor" } else { "major" };
        CamelotKey::parse_any(&format!("{raw_key} {word}"))
    });
    if let Some(key) = with_mode.or_else(|| CamelotKey::parse_any(raw_key)) {
        return Ok(key);
    }

    match raw_key.parse::<u8>() {
        Ok(number) => match mode {
            Some(mode) => CamelotKey::new(number, mode).ok_or_else(|| {
                MissingFeatureError::new(id, Feature::Key).with_detail(format!("Camelot number {number} is outside 1-12"))
            }),
            None => Err(MissingFeatureError::new(id, Feature::Key)
                .with_detail(format!("numeric key `{raw_key}` without a mode"))),
        },
        Err(_) => {
            Err(MissingFeatureError::new(id, Feature::Key).with_detail(format!("unrecognised key `{raw_key}`")))
        }
    }
}

fn optional(value: Option<&Loose>) -> Option<f64> {
    value.and_then(Loose::as_f64)
}

fn normalize_tags(tags: Option<&Tags>) -> BTreeSet<String> {
    let raw: Vec<&str> = match tags {
        Some(Tags::List(list)) => list.iter().map(String::as_str).collect(),
        Some(Tags::Joined(joined)) => joined.split([',', ';']).collect(),
        None => Vec::new(),
    };
    raw.into_iter()
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn normalize_structure(
    id: &str,
    structure: &BTreeMap<String, Vec<Loose>>,
    unit: Option<&str>,
    bpm: f64,
    grid_offset: f64,
    duration: f64,
    notices: &mut Vec<PhraseAmbiguity>,
) -> PhraseMap {
    let beat = 60.0 / bpm;
    let to_seconds: Box<dyn Fn(f64) -> f64> = match unit.map(|u| u.trim().to_ascii_lowercase()).as_deref() {
        Some("beats" | "beat") => Box::new(move |b| grid_offset + b * beat),
        Some("bars" | "bar") => Box::new(move |b| grid_offset + b * 4.0 * beat),
        Some("ms" | "milliseconds") => Box::new(|ms| ms / 1000.0),
        Some("seconds" | "secs" | "s") | None => Box::new(|s| s),
        Some(other) => {
            notices.push(PhraseAmbiguity {
                track_id: id.to_string(),
                detail: format!("unknown structure unit `{other}`, reading boundaries as seconds"),
            });
            Box::new(|s| s)
        }
    };

    let mut map = PhraseMap::new();
    for (label, boundaries) in structure {
        let Some(kind) = PhraseKind::from_label(label) else {
            notices.push(PhraseAmbiguity {
                track_id: id.to_string(),
                detail: format!("unknown phrase kind `{label}` ignored"),
            });
            continue;
        };
        for raw in boundaries {
            match raw.as_f64().map(&to_seconds) {
                Some(t) if (0.0..duration).contains(&t) => map.insert(kind, t),
                Some(t) => notices.push(PhraseAmbiguity {
                    track_id: id.to_string(),
                    detail: format!("{label} boundary at {t:.3}s lies outside the track (0..{duration:.3}s)"),
                }),
                None => notices.push(PhraseAmbiguity {
                    track_id: id.to_string(),
                    detail: format!("{label} boundary {} is not a number", raw.describe()),
                }),
            }
        }
    }
    map
}

fn normalize_cues(
    id: &str,
    cues: Option<&BTreeMap<String, Loose>>,
    notices: &mut Vec<PhraseAmbiguity>,
) -> BTreeMap<CueSlot, f64> {
    let mut out = BTreeMap::new();
    for (label, time) in cues.into_iter().flatten() {
        let slot = cue_slot(label);
        match (slot, time.as_f64()) {
            (Some(slot), Some(t)) => {
                out.insert(slot, t);
            }
            _ => notices.push(PhraseAmbiguity {
                track_id: id.to_string(),
                detail: format!("manual cue `{label}` = {} ignored", time.describe()),
            }),
        }
    }
    out
}

/// Slot named by a cue label: a single letter, `Cue X` or `Hot Cue X`
fn cue_slot(label: &str) -> Option<CueSlot> {
    let lower = label.trim().to_ascii_lowercase();
    let rest = ["hot cue", "hotcue", "hot_cue", "hot-cue", "cue"]
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix))
        .unwrap_or(&lower)
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '_' | '-' | ':'));
    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => CueSlot::from_letter(letter),
        _ => None,
    }
}

/// Read-only keyed repository of analysis records.
pub trait FeatureSource {
    /// All records, loaded once per run.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load_all(&self) -> Result<Vec<RawAnalysisRecord>>;

    /// One record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn record(&self, id: &str) -> Result<Option<RawAnalysisRecord>>;
}

/// Feature cache held in a JSON document: either an object keyed by track
/// id or an array of records carrying their own ids.
#[derive(Debug, Clone, Default)]
pub struct JsonFeatureCache {
    records: BTreeMap<String, RawAnalysisRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonLayout {
    Keyed(BTreeMap<String, Value>),
    List(Vec<Value>),
}

impl JsonFeatureCache {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let cache = Self::from_json(&text)?;
        info!("Loaded {} analysis records from {}", cache.records.len(), path.display());
        Ok(cache)
    }

    /// # Errors
    ///
    /// Returns an error if `text` is not a JSON object or array. Records
    /// with badly typed fields are kept and fail at ingestion instead.
    pub fn from_json(text: &str) -> Result<Self> {
        let layout: JsonLayout = serde_json::from_str(text)?;
        let records = match layout {
            JsonLayout::Keyed(map) => map
                .into_iter()
                .map(|(key, value)| {
                    let mut record = RawAnalysisRecord::from_value(value);
                    record.id.get_or_insert_with(|| key.clone());
                    (key, record)
                })
                .collect(),
            JsonLayout::List(list) => list
                .into_iter()
                .map(RawAnalysisRecord::from_value)
                .enumerate()
                .map(|(index, record)| {
                    let key = record
                        .id
                        .clone()
                        .or_else(|| record.path.clone())
                        .unwrap_or_else(|| format!("#{index}"));
                    (key, record)
                })
                .collect(),
        };
        Ok(Self { records })
    }

    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = RawAnalysisRecord>) -> Self {
        let records = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let key = record.id.clone().unwrap_or_else(|| format!("#{index}"));
                (key, record)
            })
            .collect();
        Self { records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FeatureSource for JsonFeatureCache {
    fn load_all(&self) -> Result<Vec<RawAnalysisRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn record(&self, id: &str) -> Result<Option<RawAnalysisRecord>> {
        Ok(self.records.get(id).cloned())
    }
}

/// Outcome of one ingestion pass
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub profiles: Vec<TrackProfile>,
    pub failures: Vec<MissingFeatureError>,
    pub notices: Vec<PhraseAmbiguity>,
    pub cancelled: bool,
}

/// Ingest every record of `source` in parallel. Per-record failures are
/// collected, never fatal. On cancellation the records already ingested
/// are kept and `cancelled` is set.
///
/// # Errors
///
/// Returns an error only if the source itself cannot be read.
pub fn ingest_all(source: &dyn FeatureSource, control: &BatchControl) -> Result<IngestReport> {
    let records = source.load_all()?;
    Ok(ingest_records(&records, control))
}

/// Parallel ingestion over records already in memory. The energy scale is
/// decided once for the whole slice.
#[must_use]
pub fn ingest_records(records: &[RawAnalysisRecord], control: &BatchControl) -> IngestReport {
    control.begin(records.len());
    let scale = EnergyScale::detect(records);
    debug!("Energy scale for this source: {scale:?}");

    let outcomes: Vec<Option<std::result::Result<Ingested, MissingFeatureError>>> = records
        .par_iter()
        .map(|record| {
            if control.is_cancelled() {
                return None;
            }
            let outcome = ingest_scaled(record, scale);
            control.tick();
            Some(outcome)
        })
        .collect();

    let mut report = IngestReport::default();
    for outcome in outcomes {
        match outcome {
            Some(Ok(ingested)) => {
                report.notices.extend(ingested.notices);
                report.profiles.push(ingested.profile);
            }
            Some(Err(err)) => {
                warn!("Skipping record: {err}");
                report.failures.push(err);
            }
            None => report.cancelled = true,
        }
    }

    info!(
        "Ingested {} profiles, {} failures, {} phrase notices{}",
        report.profiles.len(),
        report.failures.len(),
        report.notices.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    report
}

//! CareLink CSV export parsing.
//!
//! Converts the semicolon-delimited export into a sorted list of
//! [`Reading`]s. The first few lines hold patient and device metadata; data
//! rows follow one or more `Index;Date;Time;...` header rows. Multi-pump and
//! multi-section exports repeat the header, and each header re-binds the
//! column layout for the rows after it.

use glucose_core::config::EngineConfig;
use glucose_core::error::FormatError;
use glucose_core::models::{LayoutKind, ParseStats, Reading, ReadingSet, RunMetadata};
use glucose_core::time_utils::parse_local_datetime;
use tracing::{debug, warn};

pub const COL_DATE: &str = "Date";
pub const COL_TIME: &str = "Time";
pub const COL_GLUCOSE: &str = "Sensor Glucose (mg/dL)";
pub const COL_BOLUS: &str = "Bolus Volume Delivered (U)";
pub const COL_BG: &str = "BG Reading (mg/dL)";
pub const COL_CARBS: &str = "BWZ Carb Input (grams)";
pub const COL_ALERT: &str = "Alert";
pub const COL_ALARM: &str = "Alarm";
pub const COL_REWIND: &str = "Rewind";

pub const REQUIRED_COLUMNS: [&str; 3] = [COL_DATE, COL_TIME, COL_GLUCOSE];

/// Valid-row share below which the parse is logged as unreliable.
const LOW_COVERAGE_PERCENT: f64 = 70.0;

// ── Column layout ─────────────────────────────────────────────────────────────

/// Cell indices of the fields the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub date: usize,
    pub time: usize,
    pub glucose: usize,
    pub bg_meter: Option<usize>,
    pub alert: Option<usize>,
    pub bolus: Option<usize>,
    pub rewind: Option<usize>,
    pub carbs: Option<usize>,
    /// Rows with fewer cells are dropped.
    pub min_width: usize,
}

impl ColumnLayout {
    /// Canonical CareLink offsets, used when no header precedes the data.
    pub fn fixed(min_columns: usize) -> Self {
        Self {
            date: 1,
            time: 2,
            bg_meter: Some(5),
            alert: Some(7),
            bolus: Some(13),
            rewind: Some(21),
            carbs: Some(27),
            glucose: 34,
            min_width: min_columns.max(35),
        }
    }
}

/// Map header names to cell indices.
///
/// Fails with [`FormatError::MissingColumns`] listing every required name
/// that is absent. Extra or reordered columns are fine.
pub fn find_column_indices(header: &str) -> Result<ColumnLayout, FormatError> {
    let cells: Vec<&str> = header.split(';').map(clean_cell).collect();
    let position = |name: &str| cells.iter().position(|c| *c == name);

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|name| position(**name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(FormatError::MissingColumns(missing));
    }

    // Presence was checked above.
    let date = position(COL_DATE).unwrap_or_default();
    let time = position(COL_TIME).unwrap_or_default();
    let glucose = position(COL_GLUCOSE).unwrap_or_default();

    Ok(ColumnLayout {
        date,
        time,
        glucose,
        bg_meter: position(COL_BG),
        alert: position(COL_ALERT).or_else(|| position(COL_ALARM)),
        bolus: position(COL_BOLUS),
        rewind: position(COL_REWIND),
        carbs: position(COL_CARBS),
        min_width: date.max(time).max(glucose) + 1,
    })
}

// ── Metadata ──────────────────────────────────────────────────────────────────

/// Extract patient and device details from the first three lines.
///
/// Missing fields stay `None`; a malformed block is never an error.
pub fn parse_metadata(text: &str) -> RunMetadata {
    let lines: Vec<Vec<&str>> = text
        .split('\n')
        .take(3)
        .map(|l| l.trim_end_matches('\r').split(';').map(clean_cell).collect())
        .collect();

    let mut metadata = RunMetadata::default();
    if let Some(line1) = lines.first() {
        metadata.device = value_after(line1, "Device");
    }
    if let Some(line2) = lines.get(1) {
        let last = line2.first().copied().unwrap_or_default();
        let first = line2.get(1).copied().unwrap_or_default();
        let name = format!("{first} {last}").trim().to_string();
        if !name.is_empty() {
            metadata.patient_name = Some(name);
        }
        metadata.device_serial = value_after(line2, "Serial Number");
    }
    if let Some(line3) = lines.get(2) {
        metadata.cgm = value_after(line3, "CGM");
    }
    metadata
}

fn value_after(cells: &[&str], label: &str) -> Option<String> {
    let idx = cells.iter().position(|c| *c == label)?;
    cells
        .get(idx + 1)
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a CareLink export into sorted readings.
///
/// Bad rows are dropped and counted; only a blank input, an unusable layout
/// or a file with zero valid rows is fatal.
pub fn parse(raw_text: &str, config: &EngineConfig) -> Result<ReadingSet, FormatError> {
    if raw_text.trim().is_empty() {
        return Err(FormatError::Empty);
    }

    let mut state = ParseState::new(config);
    for line in raw_text.split('\n').skip(config.parser.skip_lines) {
        state.feed(line.trim_end_matches('\r'))?;
    }
    state.finish(parse_metadata(raw_text))
}

#[derive(Debug, Clone, Copy)]
enum ActiveLayout {
    /// No header or data row seen yet.
    Unbound,
    Columns(ColumnLayout, LayoutKind),
    /// A section without glucose columns; ignored until the next header.
    Skip,
}

struct ParseState<'a> {
    config: &'a EngineConfig,
    layout: ActiveLayout,
    first_layout: Option<LayoutKind>,
    readings: Vec<Reading>,
    skipped_rows: usize,
    rejected_glucose: usize,
    rewind_count: usize,
    sensor_alert_count: usize,
}

impl<'a> ParseState<'a> {
    fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            layout: ActiveLayout::Unbound,
            first_layout: None,
            readings: Vec::new(),
            skipped_rows: 0,
            rejected_glucose: 0,
            rewind_count: 0,
            sensor_alert_count: 0,
        }
    }

    fn fixed_layout(&self) -> ColumnLayout {
        ColumnLayout::fixed(self.config.parser.min_columns)
    }

    fn bind(&mut self, layout: ColumnLayout, kind: LayoutKind) {
        self.layout = ActiveLayout::Columns(layout, kind);
        self.first_layout.get_or_insert(kind);
    }

    fn feed(&mut self, line: &str) -> Result<(), FormatError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let cells: Vec<&str> = line.split(';').map(clean_cell).collect();
        if cells.first().is_some_and(|c| c.starts_with("---")) {
            return Ok(());
        }
        if is_header_row(&cells) {
            return self.bind_header(line, cells.len());
        }

        let layout = match self.layout {
            ActiveLayout::Columns(layout, _) => layout,
            ActiveLayout::Skip => return Ok(()),
            ActiveLayout::Unbound => {
                let fixed = self.fixed_layout();
                if cells.len() < fixed.min_width {
                    return Err(FormatError::TooFewColumns {
                        expected: fixed.min_width,
                        found: cells.len(),
                    });
                }
                self.bind(fixed, LayoutKind::Fixed);
                fixed
            }
        };
        self.parse_row(&cells, &layout);
        Ok(())
    }

    fn bind_header(&mut self, line: &str, width: usize) -> Result<(), FormatError> {
        match find_column_indices(line) {
            Ok(layout) => self.bind(layout, LayoutKind::Header),
            Err(err) => {
                let fixed = self.fixed_layout();
                if width >= fixed.min_width {
                    debug!("header lacks required columns; using fixed offsets");
                    self.bind(fixed, LayoutKind::Fixed);
                } else if self.first_layout.is_none() {
                    return Err(err);
                } else {
                    debug!("skipping section without glucose columns: {}", err);
                    self.layout = ActiveLayout::Skip;
                }
            }
        }
        Ok(())
    }

    fn parse_row(&mut self, cells: &[&str], layout: &ColumnLayout) {
        if cells.len() < layout.min_width {
            self.skipped_rows += 1;
            return;
        }
        let Some(timestamp) = parse_local_datetime(cells[layout.date], cells[layout.time])
        else {
            self.skipped_rows += 1;
            return;
        };

        let mut glucose_mg_dl = None;
        let glucose_cell = cell(cells, Some(layout.glucose));
        if !glucose_cell.is_empty() {
            match parse_decimal(glucose_cell) {
                Some(v) if self.config.glucose.is_valid(v) => glucose_mg_dl = Some(v),
                Some(_) => self.rejected_glucose += 1,
                None => {
                    self.skipped_rows += 1;
                    return;
                }
            }
        }

        let alert = cell(cells, layout.alert);
        let reading = Reading {
            timestamp,
            glucose_mg_dl,
            bolus_units: positive(cell(cells, layout.bolus)).unwrap_or(0.0),
            carbs_g: positive(cell(cells, layout.carbs)).unwrap_or(0.0),
            bg_meter_mg_dl: positive(cell(cells, layout.bg_meter)),
            alert_text: (!alert.is_empty()).then(|| alert.to_string()),
            is_rewind: is_rewind_cell(cell(cells, layout.rewind)),
        };

        if reading.glucose_mg_dl.is_none() && !reading.has_event() {
            self.skipped_rows += 1;
            return;
        }
        if reading.is_rewind {
            self.rewind_count += 1;
        }
        if reading
            .alert_text
            .as_deref()
            .is_some_and(|a| a.to_ascii_uppercase().contains("SENSOR"))
        {
            self.sensor_alert_count += 1;
        }
        self.readings.push(reading);
    }

    fn finish(mut self, metadata: RunMetadata) -> Result<ReadingSet, FormatError> {
        let valid_rows = self.readings.len();
        if valid_rows == 0 {
            return Err(FormatError::NoValidRows {
                checked: self.skipped_rows,
            });
        }
        // Stable: rows sharing a timestamp keep file order.
        self.readings.sort_by_key(|r| r.timestamp);

        let stats = ParseStats {
            valid_rows,
            skipped_rows: self.skipped_rows,
            rejected_glucose: self.rejected_glucose,
            rewind_count: self.rewind_count,
            sensor_alert_count: self.sensor_alert_count,
            layout: self.first_layout.unwrap_or(LayoutKind::Fixed),
        };

        debug!(
            "Parsed {} rows ({} skipped, {} out-of-range glucose, {} rewinds, {} sensor alerts)",
            stats.valid_rows,
            stats.skipped_rows,
            stats.rejected_glucose,
            stats.rewind_count,
            stats.sensor_alert_count
        );
        let coverage = stats.coverage_percent();
        if coverage < LOW_COVERAGE_PERCENT {
            warn!(
                "Low data coverage: {:.1}% of rows were usable; metrics may be unreliable",
                coverage
            );
        }

        Ok(ReadingSet {
            readings: self.readings,
            metadata,
            stats,
        })
    }
}

// ── Cell helpers ──────────────────────────────────────────────────────────────

fn clean_cell(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

fn cell<'c>(cells: &[&'c str], index: Option<usize>) -> &'c str {
    index.and_then(|i| cells.get(i).copied()).unwrap_or("")
}

/// A row is a column header when it names both `Date` and `Time`.
pub fn is_header_row(cells: &[&str]) -> bool {
    cells.contains(&COL_DATE) && cells.contains(&COL_TIME)
}

/// Parse a number that may use a decimal comma (`"5,5"`).
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    s.replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn positive(raw: &str) -> Option<f64> {
    parse_decimal(raw).filter(|v| *v > 0.0)
}

fn is_rewind_cell(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("rewind") || raw.eq_ignore_ascii_case("true")
}

// ── Tests ──────────────────────────────────────────────────────────────────────

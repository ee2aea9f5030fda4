//! Capture timestamp recovery from embedded EXIF metadata.
//!
//! Only a failure to open or read the staged file is an error. Missing,
//! blank, malformed or truncated metadata all mean "no capture timestamp".

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use exif::{Exif, In, Tag};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing::debug;

/// Timestamp tags in order of preference, each with the tag holding its UTC offset.
const CAPTURE_TIME_TAGS: [(Tag, Tag); 3] = [
    (Tag::DateTimeOriginal, Tag::OffsetTimeOriginal),
    (Tag::DateTimeDigitized, Tag::OffsetTimeDigitized),
    (Tag::DateTime, Tag::OffsetTime),
];

/// Read the capture instant of the image at `path`.
///
/// Timestamps without an offset tag are taken as UTC.
pub fn extract_capture_timestamp(path: &Path) -> io::Result<Option<DateTime<Utc>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(exif::Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("Truncated metadata in {:?}: {}", path, e);
            return Ok(None);
        }
        Err(exif::Error::Io(e)) => return Err(e),
        Err(e) => {
            debug!("No usable metadata in {:?}: {}", path, e);
            return Ok(None);
        }
    };

    Ok(capture_timestamp_from_exif(&exif))
}

fn capture_timestamp_from_exif(exif: &Exif) -> Option<DateTime<Utc>> {
    CAPTURE_TIME_TAGS
        .iter()
        .find_map(|(time_tag, offset_tag)| read_timestamp(exif, *time_tag, *offset_tag))
}

fn read_timestamp(exif: &Exif, time_tag: Tag, offset_tag: Tag) -> Option<DateTime<Utc>> {
    let field = exif.get_field(time_tag, In::PRIMARY)?;
    let exif::Value::Ascii(ref values) = field.value else {
        return None;
    };
    let mut parsed = exif::DateTime::from_ascii(values.first()?).ok()?;

    if let Some(offset_field) = exif.get_field(offset_tag, In::PRIMARY) {
        if let exif::Value::Ascii(ref offsets) = offset_field.value {
            if let Some(offset) = offsets.first() {
                // An unparseable offset leaves the timestamp as UTC
                let _ = parsed.parse_offset(offset);
            }
        }
    }

    to_utc(&parsed)
}

fn to_utc(dt: &exif::DateTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
        .and_hms_nano_opt(
            dt.hour as u32,
            dt.minute as u32,
            dt.second as u32,
            dt.nanosecond.unwrap_or(0),
        )?;
    let naive = match dt.offset {
        Some(minutes) => naive - Duration::minutes(minutes as i64),
        None => naive,
    };
    Some(Utc.from_utc_datetime(&naive))
}

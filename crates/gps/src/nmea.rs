//! NMEA `$GPGGA` parsing

use crate::{GpsError, Location};

const GPGGA: &str = "$GPGGA";

/// Extract the position from a `$GPGGA` sentence
///
/// Other sentences and fix-less GPGGA sentences yield `Ok(None)`.
pub fn parse_gpgga(line: &str) -> Result<Option<Location>, GpsError> {
    let line = line.trim();
    if !line.starts_with(GPGGA) {
        return Ok(None);
    }

    // Drop the checksum before splitting
    let body = line.split('*').next().unwrap_or(line);
    let fields: Vec<&str> = body.split(',').collect();
    if fields.len() < 7 {
        return Err(GpsError::Parse(line.to_string()));
    }

    let (lat, lat_hemisphere, lng, lng_hemisphere, quality) =
        (fields[2], fields[3], fields[4], fields[5], fields[6]);
    if lat.is_empty() || lng.is_empty() || quality == "0" {
        return Ok(None);
    }

    let latitude = degrees(lat, 2, lat_hemisphere, 'S', line)?;
    let longitude = degrees(lng, 3, lng_hemisphere, 'W', line)?;
    Ok(Some(Location::new(latitude, longitude)))
}

/// Convert `d..dmm.mmmm` with `degree_digits` leading degree digits
fn degrees(
    raw: &str,
    degree_digits: usize,
    hemisphere: &str,
    negative: char,
    line: &str,
) -> Result<f64, GpsError> {
    let malformed = || GpsError::Parse(line.to_string());
    if raw.len() <= degree_digits || !raw.is_char_boundary(degree_digits) {
        return Err(malformed());
    }

    let (deg, min) = raw.split_at(degree_digits);
    let deg: f64 = deg.parse().map_err(|_| malformed())?;
    let min: f64 = min.parse().map_err(|_| malformed())?;
    let value = deg + min / 60.0;

    if hemisphere.starts_with(negative) {
        Ok(-value)
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_parse_fix() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
        let location = parse_gpgga(line).unwrap().unwrap();
        assert!(close(location.latitude, 48.0 + 7.038 / 60.0));
        assert!(close(location.longitude, 11.0 + 31.0 / 60.0));
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let line = "$GPGGA,000000,3402.082,S,05823.100,W,1,05,1.0,10.0,M,0.0,M,,";
        let location = parse_gpgga(line).unwrap().unwrap();
        assert!(location.latitude < 0.0);
        assert!(location.longitude < 0.0);
    }

    #[test]
    fn test_ignores_other_sentences_and_no_fix() {
        assert!(parse_gpgga("$GPRMC,123519,A,4807.038,N").unwrap().is_none());
        assert!(parse_gpgga("$GPGGA,123519,,,,,0,00,,,M,,M,,*66").unwrap().is_none());
    }

    #[test]
    fn test_malformed_coordinates() {
        assert!(parse_gpgga("$GPGGA,1,48x7.0,N,01131.000,E,1").is_err());
        assert!(parse_gpgga("$GPGGA,1").is_err());
    }

    proptest! {
        #[test]
        fn prop_latitude_in_range(deg in 0u32..90, min in 0.0f64..59.999) {
            let line = format!("$GPGGA,0,{:02}{:07.4},N,03125.000,E,1,04,1.0,0,M,0,M,,", deg, min);
            let location = parse_gpgga(&line).unwrap().unwrap();
            prop_assert!((location.latitude - (deg as f64 + min / 60.0)).abs() < 1e-3);
        }
    }
}

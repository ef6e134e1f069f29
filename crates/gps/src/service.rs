//! Serial GPS reader task

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

use crate::{parse_gpgga, GpsError, LastKnownLocation};

/// GPS receiver configuration
#[derive(Debug, Clone)]
pub struct GpsConfig {
    /// Serial port of the receiver
    pub port: String,
    pub baud_rate: u32,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyS0".to_string(),
            baud_rate: 9600,
        }
    }
}

/// Background task keeping [`LastKnownLocation`] current
pub struct GpsService {
    location: LastKnownLocation,
    task: JoinHandle<()>,
}

impl GpsService {
    /// Open the serial port and start reading; must be called within a tokio runtime
    pub fn open(config: &GpsConfig) -> Result<Self, GpsError> {
        let port = tokio_serial::new(&config.port, config.baud_rate)
            .open_native_async()
            .map_err(|e| GpsError::Open {
                port: config.port.clone(),
                reason: e.to_string(),
            })?;

        info!(target: "gps", "GPS receiver on {} @ {} baud", config.port, config.baud_rate);
        Ok(Self::spawn(BufReader::new(port)))
    }

    /// Read NMEA lines from any buffered source
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let location = LastKnownLocation::new();
        let task = tokio::spawn(run(reader, location.clone()));
        Self { location, task }
    }

    /// Shared view of the last known position
    pub fn location(&self) -> LastKnownLocation {
        self.location.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        if self.is_running() {
            self.task.abort();
            info!(target: "gps", "GPS service stopped");
        }
    }
}

impl Drop for GpsService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<R>(reader: R, location: LastKnownLocation)
where
    R: AsyncBufRead + Unpin,
{
    info!(target: "gps", "GPS service started");
    let mut lines = reader.lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_gpgga(&line) {
                Ok(Some(fix)) => {
                    debug!(
                        target: "gps",
                        "Location update: lat={} lng={}",
                        fix.latitude,
                        fix.longitude
                    );
                    location.update(fix);
                }
                Ok(None) => {}
                Err(e) => warn!(target: "gps", "{}", e),
            },
            Ok(None) => {
                warn!(target: "gps", "GPS stream closed");
                break;
            }
            Err(e) => {
                error!(target: "gps", "GPS read failed, keeping last fix: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Location, LocationProvider};

    #[tokio::test]
    async fn test_updates_from_stream() {
        let nmea = "$GPRMC,ignored\n\
                    $GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n\
                    $GPGGA,garbage\n";
        let service = GpsService::spawn(BufReader::new(nmea.as_bytes()));
        let location = service.location();

        for _ in 0..100 {
            if !service.is_running() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert!(!service.is_running());
        assert!(location.has_fix());
        let fix = location.last_known_location();
        assert!((fix.latitude - 48.1173).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_fallback_without_fix() {
        let service = GpsService::spawn(BufReader::new(&b""[..]));
        assert_eq!(service.location().last_known_location(), Location::FALLBACK);
        service.stop();
    }

    #[tokio::test]
    async fn test_open_missing_port() {
        let config = GpsConfig {
            port: "/dev/does-not-exist-tty".to_string(),
            ..Default::default()
        };
        assert!(matches!(GpsService::open(&config), Err(GpsError::Open { .. })));
    }
}

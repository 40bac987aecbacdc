//! Line-oriented event source over a file or standard input.

use multiflow_monitor::StreamEvent;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{InputFormat, SourceConfig};
use crate::error::{DaemonError, DaemonResult};

/// Decode one input line. Blank lines yield `None`.
pub fn decode(line: &str, format: InputFormat) -> DaemonResult<Option<StreamEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match format {
        InputFormat::Json => StreamEvent::from_json(line)
            .map(Some)
            .map_err(|e| DaemonError::Source(e.to_string())),
        InputFormat::Csv => Ok(Some(StreamEvent::new(line))),
    }
}

/// Forward decoded lines until the input ends or the receiver goes away.
/// Undecodable lines are logged and skipped. Returns the number forwarded.
pub async fn pump<R>(reader: R, format: InputFormat, tx: mpsc::Sender<StreamEvent>) -> DaemonResult<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0u64;

    while let Some(line) = lines.next_line().await? {
        let event = match decode(&line, format) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "skipping input line");
                continue;
            }
        };
        if tx.send(event).await.is_err() {
            debug!("event receiver closed, stopping source");
            break;
        }
        forwarded += 1;
    }

    info!(events = forwarded, "event source finished");
    Ok(forwarded)
}

/// Open the configured input and pump it into `tx`.
pub async fn run(config: SourceConfig, tx: mpsc::Sender<StreamEvent>) -> DaemonResult<u64> {
    match config.input.as_deref() {
        Some(path) if path != "-" => {
            info!(path, format = ?config.format, "reading events from file");
            let file = tokio::fs::File::open(path).await?;
            pump(BufReader::new(file), config.format, tx).await
        }
        _ => {
            info!(format = ?config.format, "reading events from stdin");
            pump(BufReader::new(tokio::io::stdin()), config.format, tx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_formats() {
        let event = decode(r#"{"csv_data": "1,2"}"#, InputFormat::Json).unwrap();
        assert_eq!(event, Some(StreamEvent::new("1,2")));

        let event = decode(" 3,4 \n", InputFormat::Csv).unwrap();
        assert_eq!(event, Some(StreamEvent::new("3,4")));

        assert_eq!(decode("   ", InputFormat::Json).unwrap(), None);
        assert!(decode("1,2", InputFormat::Json).is_err());
    }

    #[tokio::test]
    async fn test_pump_skips_bad_lines() {
        let input: &[u8] = b"{\"csv_data\":\"1,2\"}\nnot json\n\n{\"csv_data\":\"3,4\"}\n";
        let (tx, mut rx) = mpsc::channel(8);

        let forwarded = pump(input, InputFormat::Json, tx).await.unwrap();
        assert_eq!(forwarded, 2);
        assert_eq!(rx.recv().await.unwrap().csv_data, "1,2");
        assert_eq!(rx.recv().await.unwrap().csv_data, "3,4");
        assert!(rx.recv().await.is_none());
    }
}

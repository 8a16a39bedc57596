//! Log output: plain `env_logger` on stderr, or an append-only file when the
//! config has a `log` section.

use std::{
    io::{self, Write},
    path::Path,
    str::FromStr,
};

use async_trait::async_trait;
use env_logger::Builder;
use log::LevelFilter;
use pingora::{
    server::{ListenFds, ShutdownWatch},
    services::Service,
};
use tokio::{
    fs::{create_dir_all, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
};

use crate::config;

/// `io::Write` end handed to env_logger; lines are forwarded to the file task.
pub struct ChannelWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sender
            .send(buf.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Background service draining log lines into the configured file.
pub struct FileLogger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl FileLogger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    /// Install env_logger with output piped to this service.
    ///
    /// `RUST_LOG` still refines the filter on top of the configured level.
    pub fn init_env_logger(&self) {
        let writer = ChannelWriter {
            sender: self.sender.clone(),
        };
        Builder::new()
            .filter_level(level_filter(&self.config.level))
            .parse_env(env_logger::Env::default())
            .target(env_logger::Target::Pipe(Box::new(writer)))
            .init();
    }

    async fn open(&self) -> io::Result<BufWriter<tokio::fs::File>> {
        if let Some(parent) = Path::new(&self.config.path).parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.config.path)
            .await?;
        Ok(BufWriter::new(file))
    }
}

/// Parse a configured level name, defaulting to `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Unknown log level {level:?}, using info");
        LevelFilter::Info
    })
}

#[async_trait]
impl Service for FileLogger {
    async fn start_service(&mut self, _fds: Option<ListenFds>, mut shutdown: ShutdownWatch) {
        let mut file = match self.open().await {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Failed to open log file {}: {e}", self.config.path);
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                },

                data = self.receiver.recv() => match data {
                    Some(data) => {
                        if let Err(e) = file.write_all(&data).await {
                            eprintln!("Failed to write to log file: {e}");
                        }
                    }
                    None => break,
                }
            }
        }

        // Drain what was logged before shutdown.
        while let Ok(data) = self.receiver.try_recv() {
            let _ = file.write_all(&data).await;
        }
        if let Err(e) = file.flush().await {
            eprintln!("Failed to flush log file: {e}");
        }
    }

    fn name(&self) -> &'static str {
        "log sync"
    }

    fn threads(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter("debug"), LevelFilter::Debug);
        assert_eq!(level_filter("WARN"), LevelFilter::Warn);
        assert_eq!(level_filter("chatty"), LevelFilter::Info);
    }

    #[test]
    fn test_channel_writer_forwards_bytes() {
        let logger = FileLogger::new(config::Log {
            path: "unused.log".to_string(),
            level: "info".to_string(),
        });
        let mut writer = ChannelWriter {
            sender: logger.sender.clone(),
        };
        writer.write_all(b"line\n").unwrap();

        let mut logger = logger;
        assert_eq!(logger.receiver.try_recv().unwrap(), b"line\n".to_vec());
    }

    #[tokio::test]
    async fn test_open_creates_parent_dir() {
        let dir = std::env::temp_dir().join(format!("reqdesk-log-{}", std::process::id()));
        let path = dir.join("nested").join("reqdesk.log");
        let logger = FileLogger::new(config::Log {
            path: path.to_string_lossy().to_string(),
            level: "info".to_string(),
        });

        let mut file = logger.open().await.unwrap();
        file.write_all(b"hello\n").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello\n");
        let _ = std::fs::remove_dir_all(&dir);
    }
}

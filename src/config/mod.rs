pub mod etcd;

use std::fs;
use std::net::SocketAddr;

use log::{debug, trace};
use pingora::server::configuration::{Opt, ServerConf};
use pingora_error::{Error, ErrorType::*, OrErr, Result};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Environment variable that overrides the API listener port.
pub const PORT_ENV: &str = "PORT";

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    pub pingora: ServerConf,

    #[validate(nested)]
    #[serde(default)]
    pub reqdesk: Reqdesk,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> Result<Self>
    where
        P: AsRef<std::path::Path> + std::fmt::Display,
    {
        let conf_str = fs::read_to_string(&path).or_err_with(ReadError, || {
            format!("Unable to read conf file from {path}")
        })?;
        debug!("Conf file read from {path}");
        Self::from_yaml(&conf_str)
    }

    // config file load entry point
    pub fn load_yaml_with_opt_override(opt: &Opt) -> Result<Self> {
        let mut conf = match &opt.conf {
            Some(path) => Self::load_from_yaml(path)?,
            None => Error::e_explain(ReadError, "No path specified")?,
        };
        conf.merge_with_opt(opt);
        conf.merge_port(std::env::var(PORT_ENV).ok().as_deref())?;
        Ok(conf)
    }

    pub fn from_yaml(conf_str: &str) -> Result<Self> {
        trace!("Read conf file: {conf_str}");
        let conf: Config = serde_yaml::from_str(conf_str).or_err_with(ReadError, || {
            format!("Unable to parse yaml conf {conf_str}")
        })?;

        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .or_err_with(FileReadError, || "Conf file valid failed")?;

        Ok(conf)
    }

    #[allow(dead_code)]
    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }

    pub fn merge_with_opt(&mut self, opt: &Opt) {
        if opt.daemon {
            self.pingora.daemon = true;
        }
    }

    /// Apply a `PORT` override to the API listener, keeping its host.
    pub fn merge_port(&mut self, port: Option<&str>) -> Result<()> {
        if let Some(port) = port {
            let port: u16 = port
                .trim()
                .parse()
                .or_err_with(ReadError, || format!("Invalid {PORT_ENV} value {port:?}"))?;
            self.reqdesk.listener.set_port(port);
            debug!("Listener port overridden to {port}");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[validate(schema(function = "Reqdesk::validate_storage"))]
pub struct Reqdesk {
    #[serde(default = "Reqdesk::default_listener")]
    pub listener: SocketAddr,
    #[serde(default)]
    pub storage: Storage,
    #[validate(nested)]
    pub etcd: Option<Etcd>,
    pub log: Option<Log>,
    pub status: Option<Status>,
}

impl Default for Reqdesk {
    fn default() -> Self {
        Self {
            listener: Self::default_listener(),
            storage: Storage::default(),
            etcd: None,
            log: None,
            status: None,
        }
    }
}

impl Reqdesk {
    fn default_listener() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 3000))
    }

    fn validate_storage(&self) -> Result<(), ValidationError> {
        if self.storage.r#type == StorageType::Etcd && self.etcd.is_none() {
            Err(ValidationError::new("etcd_required_for_etcd_storage"))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub r#type: StorageType,
}

#[derive(Copy, Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Etcd,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct Etcd {
    #[validate(length(min = 1))]
    pub host: Vec<String>,
    #[serde(default = "Etcd::default_prefix")]
    #[validate(custom(function = "Etcd::validate_prefix"))]
    pub prefix: String,
    pub timeout: Option<u32>,
    pub connect_timeout: Option<u32>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Etcd {
    fn default_prefix() -> String {
        "/reqdesk".to_string()
    }

    fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
        if prefix.starts_with('/') && !prefix.ends_with('/') {
            Ok(())
        } else {
            Err(ValidationError::new("prefix_must_start_with_slash"))
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub path: String,
    #[serde(default = "Log::default_level")]
    pub level: String,
}

impl Log {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    pub address: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_log() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn expect_invalid(conf_str: &str) {
        match Config::from_yaml(conf_str) {
            Ok(_) => panic!("Expected error, but got a valid config"),
            Err(e) => eprintln!("Error: {:?}", e),
        }
    }

    #[test]
    fn test_load_file() {
        init_log();
        let conf_str = r#"
---
pingora:
  version: 1
  threads: 2

reqdesk:
  listener: 127.0.0.1:3000
  storage:
    type: etcd
  etcd:
    host:
      - "127.0.0.1:2379"
    prefix: /media
    timeout: 3
  log:
    path: logs/reqdesk.log
  status:
    address: 127.0.0.1:7085
        "#;
        let conf = Config::from_yaml(conf_str).unwrap();
        assert_eq!(2, conf.pingora.threads);
        assert_eq!(StorageType::Etcd, conf.reqdesk.storage.r#type);
        let etcd = conf.reqdesk.etcd.as_ref().unwrap();
        assert_eq!("/media", etcd.prefix);
        assert_eq!(Some(3), etcd.timeout);
        assert_eq!("info", conf.reqdesk.log.as_ref().unwrap().level);
        assert_eq!(7085, conf.reqdesk.status.as_ref().unwrap().address.port());
        print!("{}", conf.to_yaml());
    }

    #[test]
    fn test_defaults() {
        init_log();
        let conf = Config::from_yaml("---\nreqdesk: {}\n").unwrap();
        assert_eq!(StorageType::Memory, conf.reqdesk.storage.r#type);
        assert_eq!(3000, conf.reqdesk.listener.port());
        assert!(conf.reqdesk.etcd.is_none());
    }

    #[test]
    fn test_valid_etcd_required() {
        init_log();
        expect_invalid(
            r#"
---
reqdesk:
  storage:
    type: etcd
        "#,
        );
    }

    #[test]
    fn test_valid_etcd_host_length() {
        init_log();
        expect_invalid(
            r#"
---
reqdesk:
  etcd:
    host: []
        "#,
        );
    }

    #[test]
    fn test_valid_etcd_prefix() {
        init_log();
        expect_invalid(
            r#"
---
reqdesk:
  etcd:
    host: ["127.0.0.1:2379"]
    prefix: media
        "#,
        );
    }

    #[test]
    fn test_port_override() {
        init_log();
        let mut conf = Config::from_yaml("---\nreqdesk:\n  listener: 127.0.0.1:3000\n").unwrap();
        conf.merge_port(Some("8081")).unwrap();
        assert_eq!("127.0.0.1:8081", conf.reqdesk.listener.to_string());

        conf.merge_port(None).unwrap();
        assert_eq!(8081, conf.reqdesk.listener.port());

        assert!(conf.merge_port(Some("not-a-port")).is_err());
    }
}

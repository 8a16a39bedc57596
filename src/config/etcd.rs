use std::time::Duration;

use etcd_client::{Client, ConnectOptions};
use tokio::sync::Mutex;

use crate::core::DeskResult;

use super::Etcd;

/// Lazily connected etcd client shared by the request store.
///
/// The connection is made on first use and dropped by `reset` after a
/// transport fault, so the next call reconnects.
pub struct EtcdClientWrapper {
    config: Etcd,
    client: Mutex<Option<Client>>,
}

impl EtcdClientWrapper {
    pub fn new(config: Etcd) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    fn connect_options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::default();
        if let Some(timeout) = self.config.timeout {
            options = options.with_timeout(Duration::from_secs(timeout as u64));
        };
        if let Some(connect_timeout) = self.config.connect_timeout {
            options = options.with_connect_timeout(Duration::from_secs(connect_timeout as u64));
        };
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            options = options.with_user(user.clone(), password.clone());
        };
        options
    }

    /// 获取可用的 etcd 客户端，必要时重新创建
    pub async fn client(&self) -> DeskResult<Client> {
        let mut client_guard = self.client.lock().await;

        if let Some(client) = client_guard.as_ref() {
            return Ok(client.clone());
        }

        log::info!("Creating new etcd client...");
        let client =
            Client::connect(self.config.host.clone(), Some(self.connect_options())).await?;
        *client_guard = Some(client.clone());
        Ok(client)
    }

    /// Drop the cached client after a fault
    pub async fn reset(&self) {
        *self.client.lock().await = None;
    }
}

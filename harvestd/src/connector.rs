//! Runner client construction from stored runner URLs.

use crate::errors::HarvestError;
use harvest_common::RunnerConfig;
use harvest_common::util::{netloc, redact_url};
use harvest_miner::{RunnerApi, XmlRpcRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Builds a runner client for a stored runner URL.
pub trait RunnerConnector: Send + Sync {
    fn connect(&self, runner_url: &str) -> Result<Arc<dyn RunnerApi>, HarvestError>;
}

/// XML-RPC clients authenticated with the credentials registered for the
/// runner's network location.
pub struct XmlRpcConnector {
    config: RunnerConfig,
}

impl XmlRpcConnector {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }
}

impl RunnerConnector for XmlRpcConnector {
    fn connect(&self, runner_url: &str) -> Result<Arc<dyn RunnerApi>, HarvestError> {
        let host = netloc(runner_url).unwrap_or(runner_url);
        let Some(credential) = self.config.credential_for(host) else {
            warn!(runner = %redact_url(runner_url), netloc = host, "credentials not found");
            return Err(HarvestError::MissingCredentials {
                netloc: host.to_string(),
            });
        };

        let runner = XmlRpcRunner::new(runner_url, Duration::from_secs(self.config.timeout_secs))?
            .with_credentials(&credential.username, &credential.token)
            .with_tracing(self.config.trace_rpc);
        debug!(endpoint = %redact_url(runner.endpoint()), "connected runner client");
        Ok(Arc::new(runner))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use harvest_miner::mock::MockRunner;

    /// Hands out the same mock runner for every URL.
    pub struct StaticConnector {
        pub runner: Arc<MockRunner>,
    }

    impl RunnerConnector for StaticConnector {
        fn connect(&self, _runner_url: &str) -> Result<Arc<dyn RunnerApi>, HarvestError> {
            Ok(self.runner.clone())
        }
    }
}

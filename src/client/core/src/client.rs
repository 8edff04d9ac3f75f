//! Login, logout and workspace creation.

use std::sync::Arc;

use tracing::info;

use crate::addressing::{Path, Properties};
use crate::config::{ClientConfig, WorkspaceConfig};
use crate::error::Result;
use crate::net::{Connector, Session};
use crate::telemetry::SensitiveFieldRedactor;
use crate::workspace::{DeliveryMode, Workspace};

/// Property keys understood at login.
pub const USER_KEY: &str = "user";
pub const PASSWORD_KEY: &str = "password";

/// A logged-in client.
#[derive(Debug)]
pub struct Client {
    session: Arc<Session>,
    workspace_defaults: WorkspaceConfig,
}

impl Client {
    /// Open a session. `properties` may carry `user` and `password`.
    pub fn login(connector: &dyn Connector, locator: Option<&str>, properties: &Properties) -> Result<Self> {
        Self::login_with_defaults(connector, locator, properties, WorkspaceConfig::default())
    }

    /// Open a session as described by `config`.
    pub fn login_with_config(connector: &dyn Connector, config: &ClientConfig) -> Result<Self> {
        let mut properties = Properties::new();
        if let Some(user) = &config.session.user {
            properties.insert(USER_KEY, user.clone());
        }
        if let Some(password) = &config.session.password {
            properties.insert(PASSWORD_KEY, password.clone());
        }
        Self::login_with_defaults(
            connector,
            config.session.locator.as_deref(),
            &properties,
            config.workspace.clone(),
        )
    }

    fn login_with_defaults(
        connector: &dyn Connector,
        locator: Option<&str>,
        properties: &Properties,
        workspace_defaults: WorkspaceConfig,
    ) -> Result<Self> {
        let session_properties: Properties = properties
            .iter()
            .filter(|(k, _)| *k == USER_KEY || *k == PASSWORD_KEY)
            .collect();
        let redactor = SensitiveFieldRedactor::global();
        info!(
            locator = %redactor.redact_value(locator.unwrap_or("<default>")),
            properties = %redactor.redact_properties(&session_properties),
            "Logging in"
        );
        let session = Session::open(connector, locator, &session_properties)?;
        Ok(Self {
            session: Arc::new(session),
            workspace_defaults,
        })
    }

    /// Close the session.
    pub fn logout(&self) -> Result<()> {
        info!(id = %self.id(), "Logging out");
        self.session.close()
    }

    /// Hex id of the session's peer.
    pub fn id(&self) -> String {
        self.session.info().get("peer").unwrap_or_default().to_string()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// A workspace rooted at `path`, using the configured delivery mode.
    pub fn workspace(&self, path: &Path) -> Workspace {
        Workspace::new(path.clone(), self.session.clone(), self.workspace_defaults.clone())
    }

    /// A workspace rooted at `path` whose listeners and evals run detached.
    pub fn workspace_with_executor(&self, path: &Path) -> Workspace {
        let config = WorkspaceConfig {
            delivery: DeliveryMode::Detached,
            ..self.workspace_defaults.clone()
        };
        Workspace::new(path.clone(), self.session.clone(), config)
    }
}

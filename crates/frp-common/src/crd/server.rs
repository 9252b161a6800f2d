//! FRPServer: a tunnel server

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{IniWriter, FRP_SERVER_API};
use crate::object::{Object, ObjectSpec, StatusDocument};
use crate::secret::{self, BasicAuthData, TokenData};
use crate::store::{ApiType, ObjectStore};
use crate::{Error, Result};

/// Key of the rendered config in the server's config secret
pub const SERVER_CONFIG_KEY: &str = "frps.ini";

fn default_image() -> String {
    "snowdreamtech/frps:latest".to_string()
}

fn default_tcp_port() -> u16 {
    7000
}

fn default_udp_port() -> u16 {
    7001
}

fn default_kcp_port() -> Option<u16> {
    Some(7000)
}

fn default_http_port() -> u16 {
    80
}

fn default_dashboard_port() -> u16 {
    7500
}

fn default_plugin_port() -> u16 {
    9000
}

fn default_plugin_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_plugin_path() -> String {
    "/handler".to_string()
}

/// Listener ports
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ServerPorts {
    /// Control/TCP bind port
    #[serde(default = "default_tcp_port")]
    pub tcp: u16,
    /// UDP bind port
    #[serde(default = "default_udp_port")]
    pub udp: u16,
    /// KCP bind port; omitted from the config when unset
    #[serde(default = "default_kcp_port")]
    pub kcp: Option<u16>,
}

impl Default for ServerPorts {
    fn default() -> Self {
        Self {
            tcp: default_tcp_port(),
            udp: default_udp_port(),
            kcp: default_kcp_port(),
        }
    }
}

/// HTTP(S) virtual host listeners
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct VirtualHosts {
    /// HTTP port
    #[serde(default = "default_http_port")]
    pub http: u16,
    /// HTTPS port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<u16>,
}

/// Server dashboard
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ServerDashboard {
    /// Name of a basic-auth secret with `username` and `password`
    pub credentials: String,
    /// Dashboard port
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

/// Reference to the shared token secret
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ServerToken {
    /// Secret holding `token`; generated by the operator when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Server plugin (HTTP handler called on proxy operations)
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ServerPlugin {
    /// Plugin name
    pub name: String,
    /// Handler port
    #[serde(default = "default_plugin_port")]
    pub port: u16,
    /// Handler address
    #[serde(default = "default_plugin_addr")]
    pub addr: String,
    /// Handler path
    #[serde(default = "default_plugin_path")]
    pub path: String,
    /// Comma-separated operations forwarded to the plugin
    pub ops: String,
}

impl ServerPlugin {
    fn section(&self) -> IniWriter {
        let mut w = IniWriter::section(&format!("plugin.{}", self.name));
        w.key("addr", format_args!("{}:{}", self.addr, self.port))
            .key("path", &self.path)
            .key("ops", &self.ops);
        w
    }
}

/// Desired state of a tunnel server
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrpServerSpec {
    /// Server image
    #[serde(default = "default_image")]
    pub image: String,
    /// Expose prometheus metrics
    #[serde(default = "crate::default_true")]
    pub prometheus: bool,
    /// Ports clients may bind, e.g. `2000-3000,3001,4000-50000`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_ports: Option<String>,
    /// Plugins in config order
    #[serde(default)]
    pub plugins: Vec<ServerPlugin>,
    /// Listener ports
    #[serde(default)]
    pub ports: ServerPorts,
    /// Virtual host listeners
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<VirtualHosts>,
    /// Dashboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<ServerDashboard>,
    /// Shared token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ServerToken>,
}

impl Default for FrpServerSpec {
    fn default() -> Self {
        Self {
            image: default_image(),
            prometheus: true,
            allow_ports: None,
            plugins: Vec::new(),
            ports: ServerPorts::default(),
            vhost: None,
            dashboard: None,
            token: None,
        }
    }
}

/// Observed state of a tunnel server
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrpServerStatus {
    /// Hash of the last rendered config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    /// Token secret in use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,
}

impl StatusDocument for FrpServerStatus {}

impl ObjectSpec for FrpServerSpec {
    type Status = FrpServerStatus;
    const API: ApiType = FRP_SERVER_API;
}

/// FRPServer object
pub type FrpServer = Object<FrpServerSpec>;

impl FrpServerSpec {
    /// Name of the token secret, if one is assigned
    pub fn token_secret(&self) -> Option<&str> {
        self.token.as_ref().and_then(|t| t.secret.as_deref())
    }

    /// Render `[common]` plus plugin sections.
    ///
    /// `dashboard` must be supplied when a dashboard is configured.
    pub fn render(&self, token: &TokenData, dashboard: Option<&BasicAuthData>) -> Result<String> {
        let mut w = IniWriter::section("common");
        w.key("token", &token.token)
            .key("bind_addr", "0.0.0.0")
            .key("bind_port", self.ports.tcp)
            .key("bind_udp_port", self.ports.udp)
            .key_opt("kcp_bind_port", self.ports.kcp);

        if let Some(vhost) = &self.vhost {
            w.key("vhost_http_port", vhost.http)
                .key_opt("vhost_https_port", vhost.https);
        }

        if let Some(dash) = &self.dashboard {
            let creds = dashboard.ok_or_else(|| {
                Error::validation_for_field(
                    &dash.credentials,
                    "spec.dashboard.credentials",
                    "dashboard credentials were not resolved",
                )
            })?;
            w.key("dashboard_port", dash.port)
                .key("dashboard_user", &creds.username)
                .key("dashboard_pwd", &creds.password);
        }

        w.key("enable_prometheus", self.prometheus)
            .key_opt("allow_ports", self.allow_ports.as_deref());

        for plugin in &self.plugins {
            w.append(plugin.section());
        }
        Ok(w.finish())
    }
}

impl FrpServer {
    /// Fetch the referenced secrets and render this server's config
    pub async fn config(&self, store: &dyn ObjectStore) -> Result<String> {
        let object = self.key().qualified_name();
        let namespace = self.namespace().ok_or_else(|| {
            Error::validation_for_field(&object, "metadata.namespace", "namespace is required")
        })?;
        let token_secret = self.spec.token_secret().ok_or_else(|| {
            Error::validation_for_field(&object, "spec.token.secret", "token not specified")
        })?;

        let token = secret::fetch::<TokenData>(store, namespace, token_secret).await?;
        let dashboard = match &self.spec.dashboard {
            Some(dash) => {
                Some(secret::fetch::<BasicAuthData>(store, namespace, &dash.credentials).await?)
            }
            None => None,
        };
        self.spec
            .render(&token.data, dashboard.as_ref().map(|d| &d.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectMeta;
    use crate::secret::{DecodedSecret, EncodedSecret};
    use crate::store::MemoryStore;

    const SERVER_YAML: &str = r#"
apiVersion: frp.gou177.cyou/v1
kind: FRPServer
metadata:
  name: edge
  namespace: team-a
spec:
  allowPorts: "2000-3000"
  vhost:
    https: 443
  dashboard:
    credentials: edge-dashboard
  token:
    secret: frps-edge-token
  plugins:
    - name: auth
      ops: Login,NewProxy
"#;

    fn token() -> TokenData {
        TokenData {
            token: "t0k".into(),
        }
    }

    fn server_from_yaml() -> FrpServer {
        let doc: serde_json::Value = serde_yaml::from_str(SERVER_YAML).unwrap();
        FrpServer::from_value(doc).unwrap()
    }

    async fn store_secret<D: crate::secret::SecretPayload>(
        store: &MemoryStore,
        name: &str,
        data: D,
    ) {
        let mut secret: EncodedSecret =
            DecodedSecret::new(ObjectMeta::namespaced(name, "team-a"), data, None).encode();
        secret.create(store).await.unwrap();
    }

    #[test]
    fn defaults_fill_an_empty_spec() {
        let spec: FrpServerSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, FrpServerSpec::default());
        assert_eq!(spec.ports.kcp, Some(7000));
        assert_eq!(spec.image, "snowdreamtech/frps:latest");
    }

    #[test]
    fn minimal_render() {
        let spec = FrpServerSpec::default();
        let out = spec.render(&token(), None).unwrap();
        assert_eq!(
            out,
            "[common]\n\
             token = t0k\n\
             bind_addr = 0.0.0.0\n\
             bind_port = 7000\n\
             bind_udp_port = 7001\n\
             kcp_bind_port = 7000\n\
             enable_prometheus = true\n"
        );
    }

    #[test]
    fn full_render_orders_sections() {
        let server = server_from_yaml();
        let creds = BasicAuthData {
            username: "admin".into(),
            password: "pw".into(),
        };
        let out = server.spec.render(&token(), Some(&creds)).unwrap();
        assert_eq!(
            out,
            "[common]\n\
             token = t0k\n\
             bind_addr = 0.0.0.0\n\
             bind_port = 7000\n\
             bind_udp_port = 7001\n\
             kcp_bind_port = 7000\n\
             vhost_http_port = 80\n\
             vhost_https_port = 443\n\
             dashboard_port = 7500\n\
             dashboard_user = admin\n\
             dashboard_pwd = pw\n\
             enable_prometheus = true\n\
             allow_ports = 2000-3000\n\
             [plugin.auth]\n\
             addr = 0.0.0.0:9000\n\
             path = /handler\n\
             ops = Login,NewProxy\n"
        );
    }

    #[test]
    fn disabled_kcp_is_omitted() {
        let spec = FrpServerSpec {
            ports: ServerPorts {
                kcp: None,
                ..Default::default()
            },
            prometheus: false,
            ..Default::default()
        };
        let out = spec.render(&token(), None).unwrap();
        assert!(!out.contains("kcp_bind_port"));
        assert!(out.contains("enable_prometheus = false\n"));
    }

    #[tokio::test]
    async fn config_resolves_secrets() {
        let store = MemoryStore::new();
        store_secret(&store, "frps-edge-token", token()).await;
        store_secret(
            &store,
            "edge-dashboard",
            BasicAuthData {
                username: "admin".into(),
                password: "pw".into(),
            },
        )
        .await;

        let out = server_from_yaml().config(&store).await.unwrap();
        assert!(out.starts_with("[common]\ntoken = t0k\n"));
        assert!(out.contains("dashboard_user = admin\n"));
    }

    #[tokio::test]
    async fn missing_token_reference_is_validation_error() {
        let store = MemoryStore::new();
        let server = FrpServer::new(
            ObjectMeta::namespaced("edge", "team-a"),
            FrpServerSpec::default(),
            None,
        );
        let err = server.config(&store).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn missing_dashboard_secret_fails_the_render() {
        let store = MemoryStore::new();
        store_secret(&store, "frps-edge-token", token()).await;
        let err = server_from_yaml().config(&store).await.unwrap_err();
        match err {
            Error::MissingSecret { name, .. } => assert_eq!(name, "edge-dashboard"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

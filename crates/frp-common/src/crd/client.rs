//! FRPClient: a tunnel client

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{IniWriter, FRP_CLIENT_API};
use crate::labels::LabelSet;
use crate::object::{Object, ObjectSpec, StatusDocument};
use crate::secret::{self, BasicAuthData, TokenData};
use crate::store::{ApiType, ObjectStore};
use crate::{Error, Result};

/// Key of the rendered config in the client's config secret
pub const CLIENT_CONFIG_KEY: &str = "frpc.ini";

/// Admin API binding used by the sidecar when no dashboard is configured
const SIDECAR_ADMIN_ADDR: &str = "127.0.0.1";
const SIDECAR_ADMIN_PORT: u16 = 7400;
const SIDECAR_ADMIN_USER: &str = "sidecar";
const SIDECAR_ADMIN_PASSWORD: &str = "pwd";

fn default_image() -> String {
    "snowdreamtech/frpc:latest".to_string()
}

fn default_sidecar_image() -> String {
    "registry.nonamestudio.me/gou177/frp-operator:latest".to_string()
}

fn default_server_port() -> u16 {
    7000
}

fn default_dashboard_port() -> u16 {
    7400
}

/// Token secret shared with the server
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ClientToken {
    /// Secret holding `token`
    pub secret: String,
}

/// Server the client connects to
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ClientTarget {
    /// Token secret
    pub token: ClientToken,
    /// Server address
    pub host: String,
    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Client admin dashboard
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct ClientDashboard {
    /// Name of a basic-auth secret with `username` and `password`
    pub credentials: String,
    /// Dashboard port
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
}

/// Desired state of a tunnel client
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrpClientSpec {
    /// Client image
    #[serde(default = "default_image")]
    pub image: String,
    /// Image of the config-reloading sidecar
    #[serde(default = "default_sidecar_image")]
    pub sidecar_image: String,
    /// Endpoint labels this client exposes
    #[serde(default)]
    #[schemars(schema_with = "crate::labels::label_set_schema")]
    pub selector: LabelSet,
    /// Namespaces searched for endpoints; the client's own namespace when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::labels::label_set_schema")]
    pub namespace_selector: Option<LabelSet>,
    /// Server to connect to
    pub target: ClientTarget,
    /// Admin dashboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<ClientDashboard>,
}

impl FrpClientSpec {
    /// Client spec targeting `host` with the token in `token_secret`
    pub fn new(host: impl Into<String>, token_secret: impl Into<String>) -> Self {
        Self {
            image: default_image(),
            sidecar_image: default_sidecar_image(),
            selector: LabelSet::new(),
            namespace_selector: None,
            target: ClientTarget {
                token: ClientToken {
                    secret: token_secret.into(),
                },
                host: host.into(),
                port: default_server_port(),
            },
            dashboard: None,
        }
    }

    /// Check both selectors against the label grammar
    pub fn validate(&self, object: &str) -> Result<()> {
        let selectors = [
            ("spec.selector", Some(&self.selector)),
            ("spec.namespaceSelector", self.namespace_selector.as_ref()),
        ];
        for (field, selector) in selectors {
            if let Some(selector) = selector {
                crate::labels::validate(selector)
                    .map_err(|e| Error::validation_for_field(object, field, e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Render the client `[common]` section for client `namespace/name`
    pub fn render(
        &self,
        namespace: &str,
        name: &str,
        token: &TokenData,
        dashboard: Option<&BasicAuthData>,
    ) -> Result<String> {
        let mut w = IniWriter::section("common");
        w.key("token", &token.token)
            .key("server_addr", &self.target.host)
            .key("server_port", self.target.port);

        match &self.dashboard {
            Some(dash) => {
                let creds = dashboard.ok_or_else(|| {
                    Error::validation_for_field(
                        format!("{namespace}/{name}"),
                        "spec.dashboard.credentials",
                        "dashboard credentials were not resolved",
                    )
                })?;
                w.key("admin_addr", "0.0.0.0")
                    .key("admin_port", dash.port)
                    .key("admin_user", &creds.username)
                    .key("admin_pwd", &creds.password);
            }
            None => {
                w.key("admin_addr", SIDECAR_ADMIN_ADDR)
                    .key("admin_port", SIDECAR_ADMIN_PORT)
                    .key("admin_user", SIDECAR_ADMIN_USER)
                    .key("admin_pwd", SIDECAR_ADMIN_PASSWORD);
            }
        }

        w.key("user", format_args!("k8s-{namespace}-{name}"))
            .key("meta_k8s_ns", namespace)
            .key("meta_k8s_name", name);
        Ok(w.finish())
    }
}

/// Observed state of a tunnel client
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrpClientStatus {
    /// Hash of the last rendered config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

impl StatusDocument for FrpClientStatus {}

impl ObjectSpec for FrpClientSpec {
    type Status = FrpClientStatus;
    const API: ApiType = FRP_CLIENT_API;
}

/// FRPClient object
pub type FrpClient = Object<FrpClientSpec>;

impl FrpClient {
    /// Fetch the referenced secrets and render this client's `[common]` config
    pub async fn config(&self, store: &dyn ObjectStore) -> Result<String> {
        let namespace = self.namespace().ok_or_else(|| {
            Error::validation_for_field(self.name(), "metadata.namespace", "namespace is required")
        })?;
        self.spec.validate(&self.key().qualified_name())?;
        let token =
            secret::fetch::<TokenData>(store, namespace, &self.spec.target.token.secret).await?;
        let dashboard = match &self.spec.dashboard {
            Some(dash) => {
                Some(secret::fetch::<BasicAuthData>(store, namespace, &dash.credentials).await?)
            }
            None => None,
        };
        self.spec.render(
            namespace,
            self.name(),
            &token.data,
            dashboard.as_ref().map(|d| &d.data),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectMeta;
    use crate::secret::DecodedSecret;
    use crate::store::MemoryStore;

    fn token() -> TokenData {
        TokenData {
            token: "t0k".into(),
        }
    }

    #[test]
    fn spec_defaults_from_yaml() {
        let spec: FrpClientSpec = serde_yaml::from_str(
            r#"
target:
  host: frps.example.com
  token:
    secret: frps-edge-token
selector:
  tier: public
"#,
        )
        .unwrap();
        assert_eq!(spec.target.port, 7000);
        assert_eq!(spec.image, "snowdreamtech/frpc:latest");
        assert!(spec.namespace_selector.is_none());
        assert_eq!(spec.selector.get("tier").map(String::as_str), Some("public"));
    }

    #[test]
    fn render_without_dashboard_uses_sidecar_admin() {
        let spec = FrpClientSpec::new("frps.example.com", "tok");
        let out = spec.render("team-a", "web", &token(), None).unwrap();
        assert_eq!(
            out,
            "[common]\n\
             token = t0k\n\
             server_addr = frps.example.com\n\
             server_port = 7000\n\
             admin_addr = 127.0.0.1\n\
             admin_port = 7400\n\
             admin_user = sidecar\n\
             admin_pwd = pwd\n\
             user = k8s-team-a-web\n\
             meta_k8s_ns = team-a\n\
             meta_k8s_name = web\n"
        );
    }

    #[test]
    fn render_with_dashboard_binds_all_interfaces() {
        let mut spec = FrpClientSpec::new("frps.example.com", "tok");
        spec.dashboard = Some(ClientDashboard {
            credentials: "dash".into(),
            port: 7401,
        });
        let creds = BasicAuthData {
            username: "admin".into(),
            password: "pw".into(),
        };
        let out = spec.render("team-a", "web", &token(), Some(&creds)).unwrap();
        assert!(out.contains(
            "admin_addr = 0.0.0.0\nadmin_port = 7401\nadmin_user = admin\nadmin_pwd = pw\n"
        ));
    }

    #[tokio::test]
    async fn config_requires_token_secret() {
        let store = MemoryStore::new();
        let client = FrpClient::new(
            ObjectMeta::namespaced("web", "team-a"),
            FrpClientSpec::new("frps.example.com", "tok"),
            None,
        );
        assert!(matches!(
            client.config(&store).await,
            Err(Error::MissingSecret { .. })
        ));

        let mut secret =
            DecodedSecret::new(ObjectMeta::namespaced("tok", "team-a"), token(), None).encode();
        secret.create(&store).await.unwrap();
        let out = client.config(&store).await.unwrap();
        assert!(out.contains("user = k8s-team-a-web\n"));
    }

    #[test]
    fn malformed_selectors_are_rejected() {
        let mut spec = FrpClientSpec::new("frps.example.com", "tok");
        assert!(spec.validate("team-a/web").is_ok());

        spec.selector.insert("bad key!".into(), "-x-".into());
        match spec.validate("team-a/web") {
            Err(Error::Validation { object, field, .. }) => {
                assert_eq!(object, "team-a/web");
                assert_eq!(field.as_deref(), Some("spec.selector"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        spec.selector.clear();
        spec.namespace_selector = Some([("env".to_string(), "-prod".to_string())].into());
        match spec.validate("team-a/web") {
            Err(Error::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("spec.namespaceSelector"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn config_rejects_malformed_selector() {
        let store = MemoryStore::new();
        let mut spec = FrpClientSpec::new("frps.example.com", "tok");
        spec.selector.insert("bad key!".into(), "public".into());
        let client = FrpClient::new(ObjectMeta::namespaced("web", "team-a"), spec, None);
        assert!(matches!(
            client.config(&store).await,
            Err(Error::Validation { .. })
        ));
    }
}

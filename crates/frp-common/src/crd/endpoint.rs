//! FRPClientEndpoint: one local service exposed through a tunnel
//!
//! The stored spec is a flat record so the API server can validate it
//! against a single structural schema. Before use it is checked into
//! [`EndpointSpec`], a shared base plus a per-protocol [`Proxy`] variant:
//! layer-4 proxies carry a remote port, layer-7 proxies carry HTTP routing.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{IniWriter, FRP_CLIENT_ENDPOINT_API};
use crate::labels::LabelSet;
use crate::object::{NoStatus, Object, ObjectSpec};
use crate::store::ApiType;
use crate::{Error, Result};

/// Proxy protocol
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    /// Raw TCP
    Tcp,
    /// Raw UDP
    Udp,
    /// HTTP virtual host
    Http,
    /// HTTPS virtual host
    Https,
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndpointType::Tcp => "tcp",
            EndpointType::Udp => "udp",
            EndpointType::Http => "http",
            EndpointType::Https => "https",
        })
    }
}

/// Local service the tunnel forwards to
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LocalTarget {
    /// Host or IP
    pub host: String,
    /// Port
    pub port: u16,
}

/// Port opened on the server
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RemotePort {
    /// Port
    pub port: u16,
}

/// Load-balancing group
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct LoadGroup {
    /// Group name
    pub name: String,
    /// Shared group key
    pub key: String,
}

/// HTTP routing
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    /// Headers set on proxied requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Subdomain of the server's subdomain host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    /// Custom domains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_domains: Option<Vec<String>>,
    /// URL path prefixes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<String>>,
    /// Rewritten Host header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_header_rewrite: Option<String>,
}

/// Stored endpoint spec
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrpClientEndpointSpec {
    /// Protocol; selects which of `remote`/`http` is required
    #[serde(rename = "type")]
    pub kind: EndpointType,
    /// Local service
    pub local: LocalTarget,
    /// Remote port (tcp, udp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemotePort>,
    /// HTTP routing (http, https)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpOptions>,
    /// Load-balancing group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<LoadGroup>,
    /// Encrypt traffic between client and server
    #[serde(default)]
    pub encryption: bool,
    /// Compress traffic between client and server
    #[serde(default)]
    pub compression: bool,
    /// Bandwidth limit, e.g. `1MB`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit: Option<String>,
    /// Extra directives appended verbatim
    #[serde(default)]
    pub additional_config: String,
}

impl ObjectSpec for FrpClientEndpointSpec {
    type Status = NoStatus;
    const API: ApiType = FRP_CLIENT_ENDPOINT_API;
}

/// FRPClientEndpoint object
pub type FrpClientEndpoint = Object<FrpClientEndpointSpec>;

/// Layer-4 protocols
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L4Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

/// Layer-7 protocols
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum L7Protocol {
    /// HTTP
    Http,
    /// HTTPS
    Https,
}

/// Fields shared by every proxy type
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointBase {
    /// Local service
    pub local: LocalTarget,
    /// Load-balancing group
    pub group: Option<LoadGroup>,
    /// Encryption flag
    pub encryption: bool,
    /// Compression flag
    pub compression: bool,
    /// Bandwidth limit
    pub bandwidth_limit: Option<String>,
    /// Extra directives
    pub additional_config: String,
}

/// Protocol-specific part of an endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proxy {
    /// Port-forwarding proxy
    L4 {
        /// Protocol
        protocol: L4Protocol,
        /// Port opened on the server
        remote: RemotePort,
    },
    /// Virtual-host proxy
    L7 {
        /// Protocol
        protocol: L7Protocol,
        /// Routing
        http: HttpOptions,
    },
}

impl Proxy {
    /// Protocol name as written to the config
    pub fn protocol(&self) -> EndpointType {
        match self {
            Proxy::L4 { protocol: L4Protocol::Tcp, .. } => EndpointType::Tcp,
            Proxy::L4 { protocol: L4Protocol::Udp, .. } => EndpointType::Udp,
            Proxy::L7 { protocol: L7Protocol::Http, .. } => EndpointType::Http,
            Proxy::L7 { protocol: L7Protocol::Https, .. } => EndpointType::Https,
        }
    }
}

/// Validated endpoint spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSpec {
    /// Shared fields
    pub base: EndpointBase,
    /// Protocol-specific fields
    pub proxy: Proxy,
}

impl FrpClientEndpointSpec {
    /// Check the stored record into its variant. `object` names the endpoint
    /// in errors.
    pub fn validate(&self, object: &str) -> Result<EndpointSpec> {
        let proxy = match self.kind {
            EndpointType::Tcp | EndpointType::Udp => {
                let remote = self.remote.clone().ok_or_else(|| {
                    Error::validation_for_field(
                        object,
                        "spec.remote",
                        format!("remote is required for {} endpoints", self.kind),
                    )
                })?;
                let protocol = if self.kind == EndpointType::Tcp {
                    L4Protocol::Tcp
                } else {
                    L4Protocol::Udp
                };
                Proxy::L4 { protocol, remote }
            }
            EndpointType::Http | EndpointType::Https => {
                let http = self.http.clone().ok_or_else(|| {
                    Error::validation_for_field(
                        object,
                        "spec.http",
                        format!("http is required for {} endpoints", self.kind),
                    )
                })?;
                let protocol = if self.kind == EndpointType::Http {
                    L7Protocol::Http
                } else {
                    L7Protocol::Https
                };
                Proxy::L7 { protocol, http }
            }
        };
        Ok(EndpointSpec {
            base: EndpointBase {
                local: self.local.clone(),
                group: self.group.clone(),
                encryption: self.encryption,
                compression: self.compression,
                bandwidth_limit: self.bandwidth_limit.clone(),
                additional_config: self.additional_config.clone(),
            },
            proxy,
        })
    }
}

impl EndpointSpec {
    /// Render the proxy section `[section]`
    pub fn render(&self, section: &str) -> String {
        let base = &self.base;
        let mut w = IniWriter::section(section);
        w.key("type", self.proxy.protocol())
            .key("local_ip", &base.local.host)
            .key("local_port", base.local.port)
            .key("use_encryption", base.encryption)
            .key("use_compression", base.compression);
        if let Some(group) = &base.group {
            w.key("group", &group.name).key("group_key", &group.key);
        }
        w.key_opt("bandwidth_limit", base.bandwidth_limit.as_deref());

        match &self.proxy {
            Proxy::L4 { remote, .. } => {
                w.key("remote_port", remote.port);
            }
            Proxy::L7 { http, .. } => {
                w.key_opt("subdomain", http.subdomain.as_deref())
                    .key_opt("custom_domains", joined(&http.custom_domains))
                    .key_opt("locations", joined(&http.locations))
                    .key_opt("host_header_rewrite", http.host_header_rewrite.as_deref());
                for (header, value) in &http.headers {
                    w.key(&format!("header_{header}"), value);
                }
            }
        }

        w.raw(&base.additional_config);
        w.finish()
    }
}

fn joined(list: &Option<Vec<String>>) -> Option<String> {
    list.as_ref()
        .filter(|items| !items.is_empty())
        .map(|items| items.join(","))
}

/// A validated endpoint as held by the config index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointModel {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Labels matched against client selectors
    pub labels: LabelSet,
    /// Validated spec
    pub spec: EndpointSpec,
}

impl EndpointModel {
    /// Section name, unique per (namespace, name)
    pub fn section_name(&self) -> String {
        format!("{}_{}", self.namespace, self.name)
    }

    /// Render this endpoint's proxy section
    pub fn render(&self) -> String {
        self.spec.render(&self.section_name())
    }
}

impl FrpClientEndpoint {
    /// Validate into an index model
    pub fn to_model(&self) -> Result<EndpointModel> {
        let object = self.key().qualified_name();
        let namespace = self.namespace().ok_or_else(|| {
            Error::validation_for_field(&object, "metadata.namespace", "namespace is required")
        })?;
        crate::labels::validate(&self.metadata.labels)?;
        Ok(EndpointModel {
            namespace: namespace.to_string(),
            name: self.name().to_string(),
            labels: self.metadata.labels.clone(),
            spec: self.spec.validate(&object)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectMeta;

    fn flat(kind: EndpointType) -> FrpClientEndpointSpec {
        FrpClientEndpointSpec {
            kind,
            local: LocalTarget {
                host: "web.team-a.svc".into(),
                port: 8080,
            },
            remote: None,
            http: None,
            group: None,
            encryption: false,
            compression: false,
            bandwidth_limit: None,
            additional_config: String::new(),
        }
    }

    #[test]
    fn l4_requires_remote() {
        let err = flat(EndpointType::Tcp).validate("team-a/web").unwrap_err();
        match err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.remote")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn l7_requires_http() {
        let err = flat(EndpointType::Https).validate("team-a/web").unwrap_err();
        assert!(err.to_string().contains("http is required"));
    }

    #[test]
    fn tcp_render() {
        let mut spec = flat(EndpointType::Tcp);
        spec.remote = Some(RemotePort { port: 6000 });
        spec.group = Some(LoadGroup {
            name: "web".into(),
            key: "k".into(),
        });
        spec.encryption = true;
        spec.bandwidth_limit = Some("1MB".into());
        spec.additional_config = "health_check_type = tcp\n".into();

        let out = spec.validate("team-a/web").unwrap().render("team-a_web");
        assert_eq!(
            out,
            "[team-a_web]\n\
             type = tcp\n\
             local_ip = web.team-a.svc\n\
             local_port = 8080\n\
             use_encryption = true\n\
             use_compression = false\n\
             group = web\n\
             group_key = k\n\
             bandwidth_limit = 1MB\n\
             remote_port = 6000\n\
             health_check_type = tcp\n"
        );
    }

    #[test]
    fn http_render() {
        let mut spec = flat(EndpointType::Http);
        spec.http = Some(HttpOptions {
            headers: BTreeMap::from([
                ("X-From".to_string(), "frp".to_string()),
                ("A".to_string(), "1".to_string()),
            ]),
            subdomain: Some("web".into()),
            custom_domains: Some(vec!["a.example.com".into(), "b.example.com".into()]),
            locations: Some(vec!["/".into(), "/api".into()]),
            host_header_rewrite: Some("web.local".into()),
        });

        let out = spec.validate("team-a/web").unwrap().render("team-a_web");
        assert_eq!(
            out,
            "[team-a_web]\n\
             type = http\n\
             local_ip = web.team-a.svc\n\
             local_port = 8080\n\
             use_encryption = false\n\
             use_compression = false\n\
             subdomain = web\n\
             custom_domains = a.example.com,b.example.com\n\
             locations = /,/api\n\
             host_header_rewrite = web.local\n\
             header_A = 1\n\
             header_X-From = frp\n"
        );
    }

    #[test]
    fn stored_spec_parses_type_field() {
        let spec: FrpClientEndpointSpec = serde_json::from_value(serde_json::json!({
            "type": "udp",
            "local": {"host": "dns", "port": 53},
            "remote": {"port": 5353}
        }))
        .unwrap();
        assert_eq!(spec.kind, EndpointType::Udp);
        let valid = spec.validate("kube-system/dns").unwrap();
        assert_eq!(valid.proxy.protocol(), EndpointType::Udp);
    }

    #[test]
    fn model_uses_namespace_and_name_for_section() {
        let mut spec = flat(EndpointType::Tcp);
        spec.remote = Some(RemotePort { port: 6000 });
        let endpoint = FrpClientEndpoint::new(
            ObjectMeta::namespaced("web", "team-a").with_label("tier", "public"),
            spec,
            None,
        );
        let model = endpoint.to_model().unwrap();
        assert_eq!(model.section_name(), "team-a_web");
        assert_eq!(model.labels.get("tier").map(String::as_str), Some("public"));
        assert!(model.render().starts_with("[team-a_web]\n"));
    }
}

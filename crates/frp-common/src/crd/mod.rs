//! Custom resource kinds of the `frp.gou177.cyou` API group
//!
//! - [`FrpServer`]: a tunnel server and its listener settings
//! - [`FrpClient`]: a tunnel client and the selectors choosing which
//!   endpoints it exposes
//! - [`FrpClientEndpoint`]: one exposed local service
//!
//! Each kind renders to an INI block consumed by the tunnel binaries.

mod client;
mod endpoint;
mod server;

use std::fmt::Display;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

use crate::object::schema::custom_resource_definition;
use crate::store::ApiType;
use crate::Result;

pub use client::{
    ClientDashboard, ClientTarget, ClientToken, FrpClient, FrpClientSpec, FrpClientStatus,
    CLIENT_CONFIG_KEY,
};
pub use endpoint::{
    EndpointBase, EndpointModel, EndpointSpec, EndpointType, FrpClientEndpoint,
    FrpClientEndpointSpec, HttpOptions, L4Protocol, L7Protocol, LoadGroup, LocalTarget, Proxy,
    RemotePort,
};
pub use server::{
    FrpServer, FrpServerSpec, FrpServerStatus, ServerDashboard, ServerPlugin, ServerPorts,
    ServerToken, VirtualHosts, SERVER_CONFIG_KEY,
};

/// API group of every kind in this module
pub const FRP_GROUP: &str = "frp.gou177.cyou";

/// Served (and stored) version
pub const FRP_VERSION: &str = "v1";

const fn frp_api(kind: &'static str, plural: &'static str) -> ApiType {
    ApiType {
        group: FRP_GROUP,
        version: FRP_VERSION,
        kind,
        plural,
        namespaced: true,
    }
}

/// FRPServer kind
pub const FRP_SERVER_API: ApiType = frp_api("FRPServer", "frpservers");
/// FRPClient kind
pub const FRP_CLIENT_API: ApiType = frp_api("FRPClient", "frpclients");
/// FRPClientEndpoint kind
pub const FRP_CLIENT_ENDPOINT_API: ApiType = frp_api("FRPClientEndpoint", "frpclientendpoints");

/// Definitions for every kind, in install order
pub fn all_crds() -> Result<Vec<CustomResourceDefinition>> {
    Ok(vec![
        custom_resource_definition::<FrpServerSpec>()?,
        custom_resource_definition::<FrpClientSpec>()?,
        custom_resource_definition::<FrpClientEndpointSpec>()?,
    ])
}

/// Line-oriented writer for one `[section]` of an INI file
#[derive(Debug)]
pub(crate) struct IniWriter {
    out: String,
}

impl IniWriter {
    pub(crate) fn section(name: &str) -> Self {
        Self {
            out: format!("[{name}]\n"),
        }
    }

    pub(crate) fn key(&mut self, key: &str, value: impl Display) -> &mut Self {
        self.out.push_str(&format!("{key} = {value}\n"));
        self
    }

    /// Emit `key` only when a value is present
    pub(crate) fn key_opt<V: Display>(&mut self, key: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.key(key, value);
        }
        self
    }

    /// Append free-form lines verbatim
    pub(crate) fn raw(&mut self, lines: &str) -> &mut Self {
        if !lines.trim().is_empty() {
            self.out.push_str(lines);
            if !lines.ends_with('\n') {
                self.out.push('\n');
            }
        }
        self
    }

    /// Append another section
    pub(crate) fn append(&mut self, other: IniWriter) -> &mut Self {
        self.out.push_str(&other.out);
        self
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ini_writer_skips_absent_values() {
        let mut w = IniWriter::section("common");
        w.key("bind_port", 7000)
            .key_opt("allow_ports", None::<&str>)
            .key("enable_prometheus", false);
        assert_eq!(
            w.finish(),
            "[common]\nbind_port = 7000\nenable_prometheus = false\n"
        );
    }

    #[test]
    fn raw_lines_are_newline_terminated() {
        let mut w = IniWriter::section("s");
        w.raw("a = 1").raw("").raw("b = 2\n");
        assert_eq!(w.finish(), "[s]\na = 1\nb = 2\n");
    }

    #[test]
    fn every_kind_has_a_definition() {
        let crds = all_crds().unwrap();
        let names: Vec<_> = crds
            .iter()
            .filter_map(|crd| crd.metadata.name.as_deref())
            .collect();
        assert_eq!(
            names,
            vec![
                "frpservers.frp.gou177.cyou",
                "frpclients.frp.gou177.cyou",
                "frpclientendpoints.frp.gou177.cyou",
            ]
        );
    }
}

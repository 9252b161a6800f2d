//! Aggregation engine
//!
//! Computes which endpoints a client may expose and renders them into the
//! proxy sections of its config. Output is sorted by (namespace, name) so
//! that repeated queries over an unchanged index are byte-identical.

use std::collections::BTreeMap;

use tracing::debug;

use frp_common::crd::{EndpointModel, FrpClient, FrpClientSpec};
use frp_common::labels;
use frp_common::store::ObjectStore;
use frp_common::Result;

use crate::index::ConfigIndex;

/// Namespaces a client may draw endpoints from.
///
/// Without a namespace selector this is the client's own namespace, whether
/// or not the index has seen it.
pub fn eligible_namespaces(
    index: &ConfigIndex,
    client: &FrpClientSpec,
    client_namespace: &str,
) -> Vec<String> {
    match &client.namespace_selector {
        None => vec![client_namespace.to_string()],
        Some(selector) => index
            .namespaces()
            .into_iter()
            .filter(|ns| labels::matches(selector, &ns.labels))
            .map(|ns| ns.name)
            .collect(),
    }
}

/// Endpoints visible to a client, ordered by (namespace, name)
pub fn select_endpoints(
    index: &ConfigIndex,
    client: &FrpClientSpec,
    client_namespace: &str,
) -> Vec<EndpointModel> {
    let mut selected = BTreeMap::new();
    for namespace in eligible_namespaces(index, client, client_namespace) {
        for endpoint in index.endpoints_in(&namespace) {
            if labels::matches(&client.selector, &endpoint.labels) {
                selected.insert((endpoint.namespace.clone(), endpoint.name.clone()), endpoint);
            }
        }
    }
    selected.into_values().collect()
}

/// Rendered proxy sections for a client, blank-line separated.
///
/// No eligible namespace or no matching endpoint yields an empty string.
pub fn compute_config(
    index: &ConfigIndex,
    client: &FrpClientSpec,
    client_namespace: &str,
) -> String {
    select_endpoints(index, client, client_namespace)
        .iter()
        .map(EndpointModel::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Look up client `namespace/name` and render its proxy sections.
///
/// A missing client is NotFound and a malformed selector is a validation
/// error. Store failures propagate.
pub async fn client_services_config(
    store: &dyn ObjectStore,
    index: &ConfigIndex,
    namespace: &str,
    name: &str,
) -> Result<String> {
    let client = FrpClient::get(store, Some(namespace), name).await?;
    client.spec.validate(&client.key().qualified_name())?;
    let config = compute_config(index, &client.spec, namespace);
    debug!(
        client = %name,
        namespace = %namespace,
        bytes = config.len(),
        "aggregated client services"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{labels, tcp_endpoint};
    use crate::index::NamespaceModel;
    use frp_common::labels::LabelSet;
    use frp_common::object::ObjectMeta;
    use frp_common::store::MemoryStore;
    use frp_common::Error;

    fn client(
        selector: &[(&str, &str)],
        namespace_selector: Option<&[(&str, &str)]>,
    ) -> FrpClientSpec {
        let mut spec = FrpClientSpec::new("frps.example.com", "tok");
        spec.selector = labels(selector);
        spec.namespace_selector = namespace_selector.map(labels);
        spec
    }

    fn sections(config: &str) -> Vec<&str> {
        config
            .lines()
            .filter(|l| l.starts_with('['))
            .collect()
    }

    // =========================================================================
    // Selection
    // =========================================================================

    #[test]
    fn own_namespace_label_selection() {
        let index = ConfigIndex::new();
        let public = tcp_endpoint("team-a", "e1", &[("tier", "public")], 6001);
        let internal = tcp_endpoint("team-a", "e2", &[("tier", "internal")], 6002);
        index.upsert_endpoint("team-a", "e1", public);
        index.upsert_endpoint("team-a", "e2", internal);

        let config = compute_config(&index, &client(&[("tier", "public")], None), "team-a");
        assert_eq!(config, index.endpoint("team-a", "e1").unwrap().render());
        assert_eq!(sections(&config), vec!["[team-a_e1]"]);
    }

    #[test]
    fn namespace_selector_filters_namespaces() {
        let index = ConfigIndex::new();
        index.upsert_namespace(NamespaceModel::new("ns1", labels(&[("env", "prod")])));
        index.upsert_namespace(NamespaceModel::new("ns2", labels(&[("env", "dev")])));
        index.upsert_endpoint("ns1", "a", tcp_endpoint("ns1", "a", &[], 6001));
        index.upsert_endpoint("ns2", "b", tcp_endpoint("ns2", "b", &[], 6002));

        let config = compute_config(&index, &client(&[], Some(&[("env", "prod")])), "ns2");
        assert_eq!(sections(&config), vec!["[ns1_a]"]);
    }

    #[test]
    fn unobserved_own_namespace_is_still_eligible() {
        let index = ConfigIndex::new();
        index.upsert_endpoint("team-a", "e1", tcp_endpoint("team-a", "e1", &[], 6001));
        assert_eq!(
            eligible_namespaces(&index, &client(&[], None), "team-a"),
            vec!["team-a".to_string()]
        );
        assert_eq!(sections(&compute_config(&index, &client(&[], None), "team-a")).len(), 1);
    }

    #[test]
    fn empty_selection_is_empty_text() {
        let index = ConfigIndex::new();
        assert_eq!(compute_config(&index, &client(&[], None), "team-a"), "");
        index.upsert_namespace(NamespaceModel::new("ns1", LabelSet::new()));
        assert_eq!(
            compute_config(&index, &client(&[], Some(&[("env", "prod")])), "ns1"),
            ""
        );
    }

    #[test]
    fn always_true_selector_lists_each_endpoint_once_sorted() {
        let index = ConfigIndex::new();
        for ns in ["b-ns", "a-ns"] {
            index.upsert_namespace(NamespaceModel::new(ns, LabelSet::new()));
            for name in ["z", "m", "a"] {
                index.upsert_endpoint(ns, name, tcp_endpoint(ns, name, &[], 6000));
            }
        }
        let config = compute_config(&index, &client(&[], Some(&[])), "a-ns");
        assert_eq!(
            sections(&config),
            vec!["[a-ns_a]", "[a-ns_m]", "[a-ns_z]", "[b-ns_a]", "[b-ns_m]", "[b-ns_z]"]
        );
        assert_eq!(config, compute_config(&index, &client(&[], Some(&[])), "a-ns"));
    }

    #[test]
    fn blocks_are_blank_line_separated() {
        let index = ConfigIndex::new();
        index.upsert_endpoint("ns", "a", tcp_endpoint("ns", "a", &[], 6001));
        index.upsert_endpoint("ns", "b", tcp_endpoint("ns", "b", &[], 6002));
        let config = compute_config(&index, &client(&[], None), "ns");
        assert!(config.contains("remote_port = 6001\n\n[ns_b]\n"));
    }

    // =========================================================================
    // Concurrent mutation
    // =========================================================================

    #[test]
    fn removal_during_aggregation_never_panics() {
        let index = ConfigIndex::new();
        index.upsert_namespace(NamespaceModel::new("ns", LabelSet::new()));
        index.upsert_endpoint("ns", "stable", tcp_endpoint("ns", "stable", &[], 6000));
        let spec = client(&[], Some(&[]));

        std::thread::scope(|s| {
            let writer_index = &index;
            s.spawn(move || {
                for i in 0..500u16 {
                    let name = format!("flap-{}", i % 5);
                    writer_index.upsert_endpoint("ns", &name, tcp_endpoint("ns", &name, &[], i));
                    writer_index.remove_endpoint("ns", &name);
                    if i % 50 == 0 {
                        writer_index.remove_namespace("ns");
                        writer_index.upsert_namespace(NamespaceModel::new("ns", LabelSet::new()));
                    }
                }
            });
            for _ in 0..500 {
                let config = compute_config(&index, &spec, "ns");
                let found = sections(&config);
                assert!(found.len() <= 6);
                assert!(found.iter().all(|s| s.starts_with("[ns_")));
            }
        });

        let settled = compute_config(&index, &spec, "ns");
        assert_eq!(sections(&settled), vec!["[ns_stable]"]);
    }

    // =========================================================================
    // Query boundary
    // =========================================================================

    #[tokio::test]
    async fn services_config_reads_client_from_store() {
        let store = MemoryStore::new();
        let index = ConfigIndex::new();
        let public = tcp_endpoint("team-a", "e1", &[("tier", "public")], 6001);
        index.upsert_endpoint("team-a", "e1", public);

        let mut frpc = FrpClient::new(
            ObjectMeta::namespaced("edge", "team-a"),
            client(&[("tier", "public")], None),
            None,
        );
        frpc.create(&store).await.unwrap();

        let config = client_services_config(&store, &index, "team-a", "edge").await.unwrap();
        assert_eq!(sections(&config), vec!["[team-a_e1]"]);
    }

    #[tokio::test]
    async fn services_config_rejects_malformed_selector() {
        let store = MemoryStore::new();
        let index = ConfigIndex::new();
        index.upsert_endpoint("team-a", "e1", tcp_endpoint("team-a", "e1", &[], 6001));

        let mut frpc = FrpClient::new(
            ObjectMeta::namespaced("edge", "team-a"),
            client(&[("bad key!", "-x-")], None),
            None,
        );
        frpc.create(&store).await.unwrap();

        let err = client_services_config(&store, &index, "team-a", "edge")
            .await
            .unwrap_err();
        match err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.selector")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn services_config_for_unknown_client_is_not_found() {
        let store = MemoryStore::new();
        let err = client_services_config(&store, &ConfigIndex::new(), "team-a", "ghost")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn services_config_propagates_store_outage() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = client_services_config(&store, &ConfigIndex::new(), "team-a", "edge")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable { .. }));
    }
}

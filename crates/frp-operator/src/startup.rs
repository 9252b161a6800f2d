//! CRD installation on startup using server-side apply

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use frp_common::crd::all_crds;

/// Install or update every FRP CRD, taking ownership of conflicting fields
pub async fn ensure_crds(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing FRP CRDs...");
    for crd in all_crds()? {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!("Installing {} CRD...", name);
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }
    tracing::info!("FRP CRDs installed/updated");
    Ok(())
}

/// Every CRD as a multi-document YAML stream
pub fn crd_yaml() -> anyhow::Result<String> {
    let docs = all_crds()?
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs.join("---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn yaml_stream_holds_every_kind() {
        let yaml = crd_yaml().unwrap();
        let kinds: Vec<String> = serde_yaml::Deserializer::from_str(&yaml)
            .map(|doc| {
                let crd = CustomResourceDefinition::deserialize(doc).unwrap();
                crd.spec.names.kind
            })
            .collect();
        assert_eq!(kinds, vec!["FRPServer", "FRPClient", "FRPClientEndpoint"]);
    }
}

//! CRD installation
//!
//! The operator installs its own CRDs on startup using server-side apply so
//! the installed schemas always match the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use o2_common::crd::{
    O2Alert, O2Config, O2Dashboard, O2Destination, O2Function, O2Pipeline, O2Template,
};
use o2_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn crd_def<K: CustomResourceExt>() -> CrdDef {
    CrdDef {
        name: K::crd_name(),
        crd: K::crd(),
    }
}

/// Every CRD the operator manages, Config first
fn all_crds() -> Vec<CrdDef> {
    vec![
        crd_def::<O2Config>(),
        crd_def::<O2Template>(),
        crd_def::<O2Destination>(),
        crd_def::<O2Function>(),
        crd_def::<O2Alert>(),
        crd_def::<O2Pipeline>(),
        crd_def::<O2Dashboard>(),
    ]
}

/// Render every CRD as a multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in all_crds() {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

/// Install or update every CRD using server-side apply
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in all_crds() {
        tracing::info!("Installing {} CRD...", def.name);
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("All O2 CRDs installed/updated");
    Ok(())
}

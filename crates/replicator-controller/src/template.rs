//! Pods built from a ReplicaSet's pod template

use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use replicator_common::ownership::controller_reference_for;
use replicator_common::Error;

/// Build the pod to create for a ReplicaSet
///
/// The pod gets a generated name prefixed with the ReplicaSet name, the
/// template's labels, annotations and spec, and a single controller owner
/// reference back to the ReplicaSet.
pub fn pod_from_template(rs: &ReplicaSet) -> Result<Pod, Error> {
    let owner = controller_reference_for(rs)?;
    let template = rs
        .spec
        .as_ref()
        .and_then(|s| s.template.as_ref())
        .ok_or_else(|| {
            let msg = format!("ReplicaSet {} has no pod template", owner.name);
            Error::malformed_in("template", msg)
        })?;
    let template_meta = template.metadata.as_ref();

    Ok(Pod {
        metadata: ObjectMeta {
            namespace: rs.metadata.namespace.clone(),
            generate_name: Some(format!("{}-", owner.name)),
            labels: template_meta.and_then(|m| m.labels.clone()),
            annotations: template_meta.and_then(|m| m.annotations.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: template.spec.clone(),
        status: None,
    })
}

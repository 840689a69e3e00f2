//! Test helpers for real-cluster scenarios

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::{Client, CustomResourceExt};
use tokio::sync::OnceCell;

use beacon_common::crd::{Agent, ObjectRef};
use beacon_common::kube_utils::create_client;
use beacon_e2e::TestContext;

/// Elasticsearch cluster referenced when `BEACON_E2E_ES_REF` is unset
pub const DEFAULT_ES_REF: &str = "elasticsearch";

/// Track if CRD and namespace have been installed (async-safe)
static CLUSTER_READY: OnceCell<Result<(), String>> = OnceCell::const_new();

async fn create_ignoring_conflict<K>(api: &Api<K>, obj: &K) -> Result<(), String>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

async fn prepare_cluster(client: Client, namespace: String) -> Result<(), String> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    create_ignoring_conflict(&crds, &Agent::crd()).await?;

    let namespaces: Api<Namespace> = Api::all(client);
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace),
            ..Default::default()
        },
        ..Default::default()
    };
    create_ignoring_conflict(&namespaces, &ns).await
}

/// Logging, the Agent CRD and the test namespace, then a context for the
/// cluster and Elasticsearch configured in the environment
pub async fn kind_context() -> TestContext {
    beacon_e2e::init_test_logging();
    let ctx = TestContext::from_env()
        .await
        .expect("failed to build test context from environment");

    let namespace = ctx.config.namespace.clone();
    CLUSTER_READY
        .get_or_init(|| async move {
            let client = create_client(None).await.map_err(|e| e.to_string())?;
            prepare_cluster(client, namespace).await
        })
        .await
        .clone()
        .expect("failed to prepare cluster");
    ctx
}

/// Elasticsearch cluster the agents ship to
pub fn es_ref() -> ObjectRef {
    ObjectRef {
        name: std::env::var("BEACON_E2E_ES_REF").unwrap_or_else(|_| DEFAULT_ES_REF.to_string()),
        namespace: None,
    }
}

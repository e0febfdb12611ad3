use chrono::Utc;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ClientArgs;
use crate::error::ProvisionError;
use crate::http::{PlatformTag, Transport};
use crate::overrides::merge_overrides;
use crate::reconcile::dedup;

const DEDUPED_LAUNCH_LISTS: &[&str] = &["configProfiles", "userSecrets", "workspaceSecrets"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEnv {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub config: ComputeEnvConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEnvConfig {
    #[serde(default)]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub pre_run_script: Option<String>,
    #[serde(default)]
    pub post_run_script: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TowerWorkflow {
    pub id: String,
    #[serde(default)]
    pub run_name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub compute_env_id: String,
    pub pipeline: String,
    pub revision: Option<String>,
    pub params_text: Option<String>,
    pub nextflow_config: Option<String>,
    pub run_name: Option<String>,
    pub work_dir: Option<String>,
    pub profiles: Vec<String>,
    pub user_secrets: Vec<String>,
    pub workspace_secrets: Vec<String>,
    pub pre_run_script: Option<String>,
}

/// Raw authenticated request to the Tower API; one method, like the wire
/// protocol itself.
pub trait TowerApi {
    fn request(
        &self,
        method: &str,
        endpoint: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ProvisionError>;
}

pub struct TowerHttpClient {
    transport: Transport,
}

impl TowerHttpClient {
    pub fn new(args: &ClientArgs) -> Result<Self, ProvisionError> {
        let transport = Transport::new(args, PlatformTag::Tower)?;
        Ok(Self { transport })
    }
}

impl TowerApi for TowerHttpClient {
    fn request(
        &self,
        method: &str,
        endpoint: &str,
        params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value, ProvisionError> {
        let method = match method {
            "GET" => Method::GET,
            "PUT" => Method::PUT,
            "POST" => Method::POST,
            "DELETE" => Method::DELETE,
            other => {
                return Err(ProvisionError::Configuration(format!(
                    "specified method ({other}) isn't a valid option (GET, PUT, POST, DELETE)"
                )));
            }
        };
        self.transport.request(method, endpoint, params, body)
    }
}

/// Extracts the nested resource from a response object: a single-keyed object
/// unwraps to its only value, a named key unwraps to that value, and anything
/// else passes through unchanged.
pub fn extract_resource<'a>(response: &'a Value, key: Option<&str>) -> &'a Value {
    match (response.as_object(), key) {
        (Some(object), None) if object.len() == 1 => {
            object.values().next().unwrap_or(response)
        }
        (Some(object), Some(key)) => object.get(key).unwrap_or(response),
        _ => response,
    }
}

/// Session manager for Nextflow Tower. A workspace must be opened with
/// `open_workspace()` before any workspace-relative operation.
pub struct TowerSession<A = TowerHttpClient> {
    api: A,
    workspace: Option<String>,
}

impl TowerSession<TowerHttpClient> {
    pub fn new(args: &ClientArgs) -> Result<Self, ProvisionError> {
        Ok(Self::with_api(TowerHttpClient::new(args)?))
    }
}

impl<A: TowerApi> TowerSession<A> {
    pub fn with_api(api: A) -> Self {
        Self {
            api,
            workspace: None,
        }
    }

    pub fn workspace(&self) -> Result<&str, ProvisionError> {
        self.workspace
            .as_deref()
            .ok_or(ProvisionError::ScopeNotOpen {
                scope: "workspace",
                open_fn: "open_workspace()",
            })
    }

    pub fn open_workspace(&mut self, workspace_id: impl Into<String>) {
        self.workspace = Some(workspace_id.into());
    }

    pub fn close_workspace(&mut self) {
        self.workspace = None;
    }

    fn init_params(&self) -> Result<Vec<(String, String)>, ProvisionError> {
        Ok(vec![(
            "workspaceId".to_string(),
            self.workspace()?.to_string(),
        )])
    }

    pub fn get_compute_env(&self, compute_env_id: &str) -> Result<ComputeEnv, ProvisionError> {
        let params = self.init_params()?;
        let response = self.api.request(
            "GET",
            &format!("/compute-envs/{compute_env_id}"),
            &params,
            None,
        )?;
        serde_json::from_value(extract_resource(&response, None).clone())
            .map_err(|err| ProvisionError::TowerHttp(err.to_string()))
    }

    pub fn get_workflow(&self, workflow_id: &str) -> Result<Value, ProvisionError> {
        let params = self.init_params()?;
        self.api
            .request("GET", &format!("/workflow/{workflow_id}"), &params, None)
    }

    /// Launches a workflow run. The request payload starts from the compute
    /// environment's own defaults, then caller arguments, then caller
    /// overrides; null values at each stage keep the previous value, so an
    /// override wins only when it is non-null.
    pub fn launch_workflow(
        &self,
        spec: &LaunchSpec,
        overrides: Option<&Value>,
    ) -> Result<TowerWorkflow, ProvisionError> {
        let compute_env = self.get_compute_env(&spec.compute_env_id)?;
        if compute_env.status != "AVAILABLE" {
            return Err(ProvisionError::UnavailableResource {
                kind: "compute environment",
                id: compute_env.id,
                status: compute_env.status,
            });
        }
        let base = init_launch_data(&spec.compute_env_id, &compute_env.config);
        let arguments = json!({
            "launch": {
                "configProfiles": spec.profiles,
                "configText": spec.nextflow_config,
                "paramsText": spec.params_text,
                "pipeline": spec.pipeline,
                "preRunScript": spec.pre_run_script,
                "revision": spec.revision,
                "runName": spec.run_name,
                "userSecrets": spec.user_secrets,
                "workDir": spec.work_dir,
                "workspaceSecrets": spec.workspace_secrets,
            }
        });
        let mut data = merge_overrides(&base, &arguments)?;
        if let Some(overrides) = overrides {
            data = merge_overrides(&data, overrides)?;
        }
        dedup_launch_lists(&mut data);

        let params = self.init_params()?;
        let launch_response = self
            .api
            .request("POST", "/workflow/launch", &params, Some(&data))?;
        let workflow_id = extract_resource(&launch_response, None)
            .as_str()
            .ok_or_else(|| {
                ProvisionError::TowerHttp(
                    "launch response did not contain a workflow ID".to_string(),
                )
            })?
            .to_string();
        tracing::info!(%workflow_id, pipeline = %spec.pipeline, "launched workflow");

        let workflow_response = self.get_workflow(&workflow_id)?;
        serde_json::from_value(extract_resource(&workflow_response, Some("workflow")).clone())
            .map_err(|err| ProvisionError::TowerHttp(err.to_string()))
    }
}

/// Base launch payload with the full fixed schema, pre-populated from the
/// compute environment's configuration so caller values win only when
/// non-null.
fn init_launch_data(compute_env_id: &str, ce_config: &ComputeEnvConfig) -> Value {
    json!({
        "launch": {
            "computeEnvId": compute_env_id,
            "configProfiles": [],
            "configText": null,
            "dateCreated": frontend_timestamp(),
            "entryName": null,
            "id": null,
            "mainScript": null,
            "paramsText": null,
            "pipeline": null,
            "postRunScript": ce_config.post_run_script,
            "preRunScript": ce_config.pre_run_script,
            "pullLatest": null,
            "revision": null,
            "runName": null,
            "schemaName": null,
            "stubRun": null,
            "towerConfig": null,
            "userSecrets": [],
            "workDir": ce_config.work_dir,
            "workspaceSecrets": [],
        }
    })
}

/// Replicates the date format in requests made by the Tower frontend
/// (millisecond precision with a literal Z).
fn frontend_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Duplicate names in the secret and profile lists cause request rejection,
/// so they are deduplicated after all merging is done.
fn dedup_launch_lists(data: &mut Value) {
    let Some(launch) = data.get_mut("launch").and_then(Value::as_object_mut) else {
        return;
    };
    for field in DEDUPED_LAUNCH_LISTS {
        if let Some(values) = launch.get(*field).and_then(Value::as_array) {
            let deduped = dedup_values(values);
            launch.insert((*field).to_string(), Value::Array(deduped));
        }
    }
}

fn dedup_values(values: &[Value]) -> Vec<Value> {
    if let Some(strings) = values
        .iter()
        .map(|value| value.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
    {
        return dedup(strings).into_iter().map(Value::String).collect();
    }
    let mut unique: Vec<Value> = Vec::new();
    for value in values {
        if !unique.contains(value) {
            unique.push(value.clone());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extract_single_keyed_object() {
        let nested = json!({"foo": "bar", "tic": "tac"});
        let single = json!({"thing": {"foo": "bar", "tic": "tac"}});
        assert_eq!(extract_resource(&single, None), &nested);
    }

    #[test]
    fn extract_named_key() {
        let multiple = json!({"foo": "bar", "tic": "tac"});
        assert_eq!(extract_resource(&multiple, Some("tic")), &json!("tac"));
    }

    #[test]
    fn extract_passthrough() {
        let multiple = json!({"foo": "bar", "tic": "tac"});
        assert_eq!(extract_resource(&multiple, None), &multiple);
        assert_eq!(extract_resource(&multiple, Some("toe")), &multiple);
    }

    #[test]
    fn launch_data_uses_compute_env_defaults() {
        let config = ComputeEnvConfig {
            work_dir: Some("s3://test-project-tower-scratch/work".to_string()),
            pre_run_script: Some("NXF_OPTS='-Xms4g -Xmx12g'".to_string()),
            post_run_script: None,
        };
        let data = init_launch_data("a1b2c3", &config);
        let launch = &data["launch"];
        assert_eq!(launch["computeEnvId"], json!("a1b2c3"));
        assert_eq!(launch["workDir"], json!("s3://test-project-tower-scratch/work"));
        assert_eq!(launch["preRunScript"], json!("NXF_OPTS='-Xms4g -Xmx12g'"));
        assert_eq!(launch["postRunScript"], json!(null));
        assert!(launch["dateCreated"].is_string());
    }

    #[test]
    fn frontend_timestamp_format() {
        let stamp = frontend_timestamp();
        assert!(stamp.ends_with('Z'));
        // e.g. 2023-02-15T21:53:41.049Z
        assert_eq!(stamp.len(), 24);
    }

    #[test]
    fn dedup_launch_lists_removes_duplicates() {
        let mut data = json!({
            "launch": {
                "configProfiles": ["test", "test"],
                "userSecrets": ["A", "A", "B"],
                "workspaceSecrets": [],
                "runName": "example",
            }
        });
        dedup_launch_lists(&mut data);
        let launch = &data["launch"];
        assert_eq!(launch["configProfiles"].as_array().unwrap().len(), 1);
        assert_eq!(launch["userSecrets"].as_array().unwrap().len(), 2);
        assert_eq!(launch["workspaceSecrets"].as_array().unwrap().len(), 0);
        assert_eq!(launch["runName"], json!("example"));
    }
}

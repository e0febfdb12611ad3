use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ClientArgs;
use crate::error::ProvisionError;
use crate::http::{PlatformTag, Transport};
use crate::paths::{Scope, resolve_path, split_project_path};
use crate::poll::{JobState, PollPolicy, await_terminal};
use crate::reconcile::get_or_create;

#[derive(Debug, Clone, Deserialize)]
pub struct SbgProject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbgApp {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub raw: AppRaw,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppRaw {
    #[serde(default, rename = "sbg:archived")]
    pub archived: bool,
}

impl SbgApp {
    pub fn is_archived(&self) -> bool {
        self.raw.archived
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbgFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbgVolume {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbgImportJob {
    pub id: String,
    pub state: JobState,
    #[serde(default)]
    pub result: Option<SbgFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbgTask {
    pub id: String,
    pub name: String,
    pub app: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SbgBillingGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy)]
pub enum VolumeRef<'a> {
    Name(&'a str),
    Id(&'a str),
}

/// Raw SevenBridges API operations, one method per remote call. The session
/// composes these into idempotent ensure-style operations.
pub trait SbgApi {
    fn query_projects(&self, name: &str) -> Result<Vec<SbgProject>, ProvisionError>;
    fn get_project(&self, id: &str) -> Result<Option<SbgProject>, ProvisionError>;
    fn create_project(&self, name: &str, billing_group_id: &str) -> Result<(), ProvisionError>;
    fn query_billing_groups(&self) -> Result<Vec<SbgBillingGroup>, ProvisionError>;
    fn query_apps(&self, project_id: &str, query: &str) -> Result<Vec<SbgApp>, ProvisionError>;
    fn query_public_apps(&self, app_id: &str) -> Result<Vec<SbgApp>, ProvisionError>;
    fn copy_app(&self, app_id: &str, project_id: &str, name: &str) -> Result<(), ProvisionError>;
    fn query_children(&self, parent: &Scope) -> Result<Vec<SbgFile>, ProvisionError>;
    fn create_folder(&self, name: &str, parent: &Scope) -> Result<(), ProvisionError>;
    fn get_volume(&self, id: &str) -> Result<Option<SbgVolume>, ProvisionError>;
    fn query_volumes(&self) -> Result<Vec<SbgVolume>, ProvisionError>;
    fn submit_import(
        &self,
        volume_id: &str,
        volume_path: &str,
        parent: &Scope,
    ) -> Result<SbgImportJob, ProvisionError>;
    fn get_import(&self, import_id: &str) -> Result<SbgImportJob, ProvisionError>;
    fn query_tasks(&self, project_id: &str) -> Result<Vec<SbgTask>, ProvisionError>;
    fn create_task(
        &self,
        project_id: &str,
        app_id: &str,
        name: &str,
        inputs: &Value,
    ) -> Result<(), ProvisionError>;
}

pub struct SbgHttpClient {
    transport: Transport,
}

impl SbgHttpClient {
    pub fn new(args: &ClientArgs) -> Result<Self, ProvisionError> {
        let transport = Transport::new(args, PlatformTag::SevenBridges)?;
        Ok(Self { transport })
    }

    fn paged_list<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<Vec<T>, ProvisionError> {
        let items = self.transport.paged(endpoint, params)?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|err| ProvisionError::SbgHttp(err.to_string()))
            })
            .collect()
    }

    fn parent_params(parent: &Scope) -> Vec<(String, String)> {
        match parent {
            Scope::Project(id) => vec![("project".to_string(), id.clone())],
            Scope::Folder(id) => vec![("parent".to_string(), id.clone())],
        }
    }

    fn parent_body(parent: &Scope) -> (&'static str, &str) {
        match parent {
            Scope::Project(id) => ("project", id),
            Scope::Folder(id) => ("parent", id),
        }
    }
}

impl SbgApi for SbgHttpClient {
    fn query_projects(&self, name: &str) -> Result<Vec<SbgProject>, ProvisionError> {
        self.paged_list("/projects", &[("name".to_string(), name.to_string())])
    }

    fn get_project(&self, id: &str) -> Result<Option<SbgProject>, ProvisionError> {
        match self
            .transport
            .request(Method::GET, &format!("/projects/{id}"), &[], None)
        {
            Ok(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ProvisionError::SbgHttp(err.to_string())),
            Err(ProvisionError::SbgStatus { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn create_project(&self, name: &str, billing_group_id: &str) -> Result<(), ProvisionError> {
        let body = json!({"name": name, "billing_group": billing_group_id});
        self.transport
            .request(Method::POST, "/projects", &[], Some(&body))?;
        Ok(())
    }

    fn query_billing_groups(&self) -> Result<Vec<SbgBillingGroup>, ProvisionError> {
        self.paged_list("/billing/groups", &[])
    }

    fn query_apps(&self, project_id: &str, query: &str) -> Result<Vec<SbgApp>, ProvisionError> {
        self.paged_list(
            "/apps",
            &[
                ("project".to_string(), project_id.to_string()),
                ("q".to_string(), query.to_string()),
            ],
        )
    }

    fn query_public_apps(&self, app_id: &str) -> Result<Vec<SbgApp>, ProvisionError> {
        self.paged_list(
            "/apps",
            &[
                ("visibility".to_string(), "public".to_string()),
                ("id".to_string(), app_id.to_string()),
            ],
        )
    }

    fn copy_app(&self, app_id: &str, project_id: &str, name: &str) -> Result<(), ProvisionError> {
        let body = json!({"project": project_id, "name": name});
        self.transport.request(
            Method::POST,
            &format!("/apps/{app_id}/actions/copy"),
            &[],
            Some(&body),
        )?;
        Ok(())
    }

    fn query_children(&self, parent: &Scope) -> Result<Vec<SbgFile>, ProvisionError> {
        self.paged_list("/files", &Self::parent_params(parent))
    }

    fn create_folder(&self, name: &str, parent: &Scope) -> Result<(), ProvisionError> {
        let (parent_key, parent_id) = Self::parent_body(parent);
        let body = json!({"name": name, "type": "folder", parent_key: parent_id});
        self.transport
            .request(Method::POST, "/files", &[], Some(&body))?;
        Ok(())
    }

    fn get_volume(&self, id: &str) -> Result<Option<SbgVolume>, ProvisionError> {
        match self
            .transport
            .request(Method::GET, &format!("/storage/volumes/{id}"), &[], None)
        {
            Ok(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ProvisionError::SbgHttp(err.to_string())),
            Err(ProvisionError::SbgStatus { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn query_volumes(&self) -> Result<Vec<SbgVolume>, ProvisionError> {
        self.paged_list("/storage/volumes", &[])
    }

    fn submit_import(
        &self,
        volume_id: &str,
        volume_path: &str,
        parent: &Scope,
    ) -> Result<SbgImportJob, ProvisionError> {
        let (parent_key, parent_id) = Self::parent_body(parent);
        let body = json!({
            "source": {"volume": volume_id, "location": volume_path},
            "destination": {parent_key: parent_id},
        });
        let response =
            self.transport
                .request(Method::POST, "/storage/imports", &[], Some(&body))?;
        serde_json::from_value(response).map_err(|err| ProvisionError::SbgHttp(err.to_string()))
    }

    fn get_import(&self, import_id: &str) -> Result<SbgImportJob, ProvisionError> {
        let response = self.transport.request(
            Method::GET,
            &format!("/storage/imports/{import_id}"),
            &[],
            None,
        )?;
        serde_json::from_value(response).map_err(|err| ProvisionError::SbgHttp(err.to_string()))
    }

    fn query_tasks(&self, project_id: &str) -> Result<Vec<SbgTask>, ProvisionError> {
        self.paged_list("/tasks", &[("project".to_string(), project_id.to_string())])
    }

    fn create_task(
        &self,
        project_id: &str,
        app_id: &str,
        name: &str,
        inputs: &Value,
    ) -> Result<(), ProvisionError> {
        let body = json!({
            "name": name,
            "project": project_id,
            "app": app_id,
            "inputs": inputs,
        });
        self.transport
            .request(Method::POST, "/tasks", &[], Some(&body))?;
        Ok(())
    }
}

/// Session manager for SevenBridges/Cavatica. A project must be opened with
/// `open_project()` before any project-relative operation.
pub struct SbgSession<A = SbgHttpClient> {
    api: A,
    project: Option<SbgProject>,
    poll: PollPolicy,
}

impl SbgSession<SbgHttpClient> {
    pub fn new(args: &ClientArgs) -> Result<Self, ProvisionError> {
        Ok(Self::with_api(SbgHttpClient::new(args)?))
    }
}

impl<A: SbgApi> SbgSession<A> {
    pub fn with_api(api: A) -> Self {
        Self {
            api,
            project: None,
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn project(&self) -> Result<&SbgProject, ProvisionError> {
        self.project.as_ref().ok_or(ProvisionError::ScopeNotOpen {
            scope: "project",
            open_fn: "open_project()",
        })
    }

    pub fn open_project(&mut self, project_id: &str) -> Result<(), ProvisionError> {
        let project = self.api.get_project(project_id)?.ok_or_else(|| {
            ProvisionError::UnavailableResource {
                kind: "project",
                id: project_id.to_string(),
                status: "not found".to_string(),
            }
        })?;
        tracing::info!(project_id = %project.id, "opened project");
        self.project = Some(project);
        Ok(())
    }

    pub fn close_project(&mut self) {
        self.project = None;
    }

    pub fn ensure_project(
        &self,
        project_name: &str,
        billing_group_name: &str,
    ) -> Result<SbgProject, ProvisionError> {
        get_or_create(
            "project",
            project_name,
            || {
                let projects = self.api.query_projects(project_name)?;
                Ok(projects
                    .into_iter()
                    .filter(|project| project.name == project_name)
                    .collect())
            },
            || {
                let billing_group = self.billing_group(billing_group_name)?;
                self.api.create_project(project_name, &billing_group.id)
            },
        )
    }

    fn billing_group(&self, name: &str) -> Result<SbgBillingGroup, ProvisionError> {
        let mut matches: Vec<SbgBillingGroup> = self
            .api
            .query_billing_groups()?
            .into_iter()
            .filter(|group| group.name == name)
            .collect();
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(ProvisionError::UnavailableResource {
                kind: "billing group",
                id: name.to_string(),
                status: "not found".to_string(),
            }),
            count => Err(ProvisionError::AmbiguousMatch {
                kind: "billing group",
                name: name.to_string(),
                count,
            }),
        }
    }

    fn public_app(&self, app_id: &str) -> Result<SbgApp, ProvisionError> {
        let mut matches = self.api.query_public_apps(app_id)?;
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(ProvisionError::UnavailableResource {
                kind: "public app",
                id: app_id.to_string(),
                status: "not found".to_string(),
            }),
            count => Err(ProvisionError::AmbiguousMatch {
                kind: "public app",
                name: app_id.to_string(),
                count,
            }),
        }
    }

    /// Computes the disambiguating suffix for copies of a public app. Copies
    /// are named `slug`, `slug-1`, `slug-2`, ...; a lookup reuses the highest
    /// existing number while a creation takes the next one, so repeated runs
    /// resolve to the existing copy without suffix growth.
    fn app_suffix(&self, slug: &str, increment: bool) -> Result<String, ProvisionError> {
        let apps = self.api.query_apps(&self.project()?.id, slug)?;
        let pattern = Regex::new(&format!(r"{}-(\d+)", regex::escape(slug)))
            .map_err(|err| ProvisionError::Configuration(err.to_string()))?;
        let last_version = apps
            .iter()
            .filter_map(|app| pattern.captures(&app.id))
            .filter_map(|captures| captures[1].parse::<u64>().ok())
            .max();
        let suffix = match (last_version, increment) {
            (Some(version), false) => format!("-{version}"),
            (Some(version), true) => format!("-{}", version + 1),
            (None, false) => String::new(),
            (None, true) => "-1".to_string(),
        };
        Ok(suffix)
    }

    fn copied_app_name(&self, public_app: &SbgApp, increment: bool) -> Result<String, ProvisionError> {
        let slug = public_app
            .id
            .rsplit('/')
            .next()
            .unwrap_or(public_app.id.as_str());
        let suffix = self.app_suffix(slug, increment)?;
        Ok(format!("{slug}{suffix}"))
    }

    fn get_copied_app(&self, public_app: &SbgApp) -> Result<Vec<SbgApp>, ProvisionError> {
        let app_name = self.copied_app_name(public_app, false)?;
        let apps = self.api.query_apps(&self.project()?.id, &app_name)?;
        let mut apps: Vec<SbgApp> = apps
            .into_iter()
            .filter(|app| !app.is_archived())
            .collect();
        // Multiple non-archived candidates can match; the shortest ID is the
        // earliest copy.
        if apps.len() > 1 {
            apps.sort_by_key(|app| app.id.len());
            apps.truncate(1);
        }
        Ok(apps)
    }

    pub fn ensure_copied_app(&self, app_id: &str) -> Result<SbgApp, ProvisionError> {
        let public_app = self.public_app(app_id)?;
        get_or_create(
            "app",
            app_id,
            || self.get_copied_app(&public_app),
            || {
                let app_name = self.copied_app_name(&public_app, true)?;
                tracing::info!(%app_id, %app_name, "copying public app into project");
                self.api.copy_app(&public_app.id, &self.project()?.id, &app_name)
            },
        )
    }

    /// Volumes are provisioned out-of-band, so this is a get-only
    /// reconciliation: the create branch always fails.
    pub fn resolve_volume(&self, volume: VolumeRef<'_>) -> Result<SbgVolume, ProvisionError> {
        let label = match volume {
            VolumeRef::Name(name) => name,
            VolumeRef::Id(id) => id,
        };
        get_or_create(
            "volume",
            label,
            || match volume {
                VolumeRef::Name(name) => {
                    let volumes = self.api.query_volumes()?;
                    Ok(volumes.into_iter().filter(|v| v.name == name).collect())
                }
                VolumeRef::Id(id) => Ok(self.api.get_volume(id)?.into_iter().collect()),
            },
            || {
                Err(ProvisionError::UnavailableResource {
                    kind: "volume",
                    id: label.to_string(),
                    status: "volumes are provisioned out-of-band".to_string(),
                })
            },
        )
    }

    pub fn ensure_folder(&self, name: &str, parent: &Scope) -> Result<SbgFile, ProvisionError> {
        get_or_create(
            "folder",
            name,
            || {
                let children = self.api.query_children(parent)?;
                Ok(children
                    .into_iter()
                    .filter(|child| child.kind == "folder" && child.name == name)
                    .collect())
            },
            || self.api.create_folder(name, parent),
        )
    }

    pub fn resolve_folders(&self, segments: &[String]) -> Result<Scope, ProvisionError> {
        let root = Scope::Project(self.project()?.id.clone());
        resolve_path(segments, root, |name, parent| {
            self.ensure_folder(name, parent).map(|folder| folder.id)
        })
    }

    fn get_file(&self, name: &str, parent: &Scope) -> Result<Vec<SbgFile>, ProvisionError> {
        let children = self.api.query_children(parent)?;
        Ok(children
            .into_iter()
            .filter(|child| child.kind == "file" && child.name == name)
            .collect())
    }

    fn import_volume_file(
        &self,
        volume_id: &str,
        volume_path: &str,
        parent: &Scope,
    ) -> Result<SbgFile, ProvisionError> {
        let submitted = self.api.submit_import(volume_id, volume_path, parent)?;
        tracing::info!(%volume_id, %volume_path, import_id = %submitted.id, "awaiting volume import");
        let job = await_terminal(self.poll, || self.api.get_import(&submitted.id), |job| job.state)?;
        match job.state {
            JobState::Completed => job.result.ok_or_else(|| {
                ProvisionError::SbgHttp("import job completed without a result file".to_string())
            }),
            _ => Err(ProvisionError::ImportFailed {
                volume_path: volume_path.to_string(),
            }),
        }
    }

    /// Ensures a volume file is imported under the given project-relative
    /// path, creating any missing intermediate folders.
    pub fn ensure_imported_file(
        &self,
        volume_id: &str,
        volume_path: &str,
        project_path: &str,
    ) -> Result<SbgFile, ProvisionError> {
        let (folder_names, file_name) = split_project_path(project_path)?;
        let parent = self.resolve_folders(&folder_names)?;
        get_or_create(
            "file",
            &file_name,
            || self.get_file(&file_name, &parent),
            || {
                self.import_volume_file(volume_id, volume_path, &parent)
                    .map(|_| ())
            },
        )
    }

    pub fn ensure_task(
        &self,
        app_id: &str,
        task_name: &str,
        inputs: &Value,
    ) -> Result<SbgTask, ProvisionError> {
        get_or_create(
            "task",
            task_name,
            || {
                let tasks = self.api.query_tasks(&self.project()?.id)?;
                Ok(tasks
                    .into_iter()
                    .filter(|task| task.name == task_name && task.app.contains(app_id))
                    .collect())
            },
            || {
                self.api
                    .create_task(&self.project()?.id, app_id, task_name, inputs)
            },
        )
    }
}

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use crate::config::ClientArgs;
use crate::error::ProvisionError;
use crate::http::{PlatformTag, Transport};
use crate::paths::{Scope, resolve_path};
use crate::reconcile::get_or_create;

pub const PROJECT_TYPE: &str = "org.sagebionetworks.repo.model.Project";
pub const FOLDER_TYPE: &str = "org.sagebionetworks.repo.model.Folder";
pub const FILE_TYPE: &str = "org.sagebionetworks.repo.model.FileEntity";

#[derive(Debug, Clone, Deserialize)]
pub struct SynapseEntity {
    pub id: String,
    pub name: String,
    #[serde(rename = "concreteType")]
    pub concrete_type: String,
    #[serde(default, rename = "parentId")]
    pub parent_id: Option<String>,
}

/// Raw Synapse repository-service operations. Synapse addresses children by
/// (parent, name) lookups rather than filtered queries, so the collection for
/// reconciliation is at most one element.
pub trait SynapseApi {
    fn lookup_child(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<String>, ProvisionError>;
    fn get_entity(&self, id: &str) -> Result<SynapseEntity, ProvisionError>;
    fn create_entity(
        &self,
        name: &str,
        parent_id: Option<&str>,
        concrete_type: &str,
    ) -> Result<(), ProvisionError>;
}

pub struct SynapseHttpClient {
    transport: Transport,
}

impl SynapseHttpClient {
    pub fn new(args: &ClientArgs) -> Result<Self, ProvisionError> {
        let transport = Transport::new(args, PlatformTag::Synapse)?;
        Ok(Self { transport })
    }
}

impl SynapseApi for SynapseHttpClient {
    fn lookup_child(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<String>, ProvisionError> {
        let body = json!({"parentId": parent_id, "entityName": name});
        match self
            .transport
            .request(Method::POST, "/entity/child", &[], Some(&body))
        {
            Ok(response) => Ok(response
                .get("id")
                .and_then(|id| id.as_str())
                .map(str::to_string)),
            Err(ProvisionError::SynapseStatus { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn get_entity(&self, id: &str) -> Result<SynapseEntity, ProvisionError> {
        let response = self
            .transport
            .request(Method::GET, &format!("/entity/{id}"), &[], None)?;
        serde_json::from_value(response).map_err(|err| ProvisionError::SynapseHttp(err.to_string()))
    }

    fn create_entity(
        &self,
        name: &str,
        parent_id: Option<&str>,
        concrete_type: &str,
    ) -> Result<(), ProvisionError> {
        let body = json!({
            "name": name,
            "parentId": parent_id,
            "concreteType": concrete_type,
        });
        self.transport
            .request(Method::POST, "/entity", &[], Some(&body))?;
        Ok(())
    }
}

/// Session manager for Synapse. A project must be opened with
/// `open_project()` before any project-relative operation.
pub struct SynapseSession<A = SynapseHttpClient> {
    api: A,
    project: Option<SynapseEntity>,
}

impl SynapseSession<SynapseHttpClient> {
    pub fn new(args: &ClientArgs) -> Result<Self, ProvisionError> {
        Ok(Self::with_api(SynapseHttpClient::new(args)?))
    }
}

impl<A: SynapseApi> SynapseSession<A> {
    pub fn with_api(api: A) -> Self {
        Self { api, project: None }
    }

    pub fn project(&self) -> Result<&SynapseEntity, ProvisionError> {
        self.project.as_ref().ok_or(ProvisionError::ScopeNotOpen {
            scope: "project",
            open_fn: "open_project()",
        })
    }

    pub fn open_project(&mut self, project_id: &str) -> Result<(), ProvisionError> {
        let entity = self.api.get_entity(project_id)?;
        if entity.concrete_type != PROJECT_TYPE {
            return Err(ProvisionError::UnavailableResource {
                kind: "project",
                id: project_id.to_string(),
                status: format!("not a project ({})", entity.concrete_type),
            });
        }
        tracing::info!(project_id = %entity.id, "opened project");
        self.project = Some(entity);
        Ok(())
    }

    pub fn close_project(&mut self) {
        self.project = None;
    }

    fn get_child(
        &self,
        name: &str,
        parent_id: Option<&str>,
        concrete_type: &str,
    ) -> Result<Vec<SynapseEntity>, ProvisionError> {
        let Some(id) = self.api.lookup_child(parent_id, name)? else {
            return Ok(Vec::new());
        };
        let entity = self.api.get_entity(&id)?;
        if entity.concrete_type == concrete_type {
            Ok(vec![entity])
        } else {
            Ok(Vec::new())
        }
    }

    pub fn ensure_project(&self, name: &str) -> Result<SynapseEntity, ProvisionError> {
        get_or_create(
            "project",
            name,
            || self.get_child(name, None, PROJECT_TYPE),
            || self.api.create_entity(name, None, PROJECT_TYPE),
        )
    }

    pub fn ensure_folder(
        &self,
        name: &str,
        parent: &Scope,
    ) -> Result<SynapseEntity, ProvisionError> {
        get_or_create(
            "folder",
            name,
            || self.get_child(name, Some(parent.id()), FOLDER_TYPE),
            || self.api.create_entity(name, Some(parent.id()), FOLDER_TYPE),
        )
    }

    pub fn resolve_folders(&self, segments: &[String]) -> Result<Scope, ProvisionError> {
        let root = Scope::Project(self.project()?.id.clone());
        resolve_path(segments, root, |name, parent| {
            self.ensure_folder(name, parent).map(|folder| folder.id)
        })
    }

    /// Resolves a slash-separated folder path under the opened project,
    /// creating missing segments.
    pub fn resolve_folder_path(&self, path: &str) -> Result<Scope, ProvisionError> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .map(str::to_string)
            .collect();
        if segments.iter().any(|segment| segment == "..") {
            return Err(ProvisionError::InvalidPath(path.to_string()));
        }
        self.resolve_folders(&segments)
    }

    pub fn find_file(
        &self,
        name: &str,
        parent: &Scope,
    ) -> Result<Option<SynapseEntity>, ProvisionError> {
        let mut matches = self.get_child(name, Some(parent.id()), FILE_TYPE)?;
        Ok(matches.pop())
    }
}

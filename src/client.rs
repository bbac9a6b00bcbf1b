//! Commvault API client.
//!
//! One client is built per target so that the TLS verification flag and the
//! request timeout can differ between targets. Every call takes the session
//! token explicitly; token caching lives in [`crate::session`].

use crate::config::TargetConfig;
use crate::error::{CommvaultError, Result};
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Commvault's application id for SQL Server instances.
const SQL_SERVER_APP_ID: &str = "81";

/// Commvault REST API client for one target.
#[derive(Clone)]
pub struct CommvaultClient {
    client: Client,
    config: TargetConfig,
    base_url: String,
}

impl CommvaultClient {
    /// Create a new Commvault API client.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use commvault_exporter::client::CommvaultClient;
    /// use commvault_exporter::config::TargetConfig;
    ///
    /// let config = TargetConfig::new(
    ///     "prod",
    ///     "https://commserve.example.com/webconsole/api",
    ///     "admin",
    ///     "secret",
    /// );
    /// let client = CommvaultClient::new(config).unwrap();
    /// ```
    pub fn new(config: TargetConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()?;

        let base_url = config.api_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Configuration of the target this client talks to.
    pub fn target(&self) -> &TargetConfig {
        &self.config
    }

    /// Log in and return a fresh session token.
    ///
    /// Every failure, including transport and parse errors, is reported as
    /// [`CommvaultError::Auth`].
    pub async fn login(&self) -> Result<String> {
        self.login_inner().await.map_err(|e| match e {
            auth @ CommvaultError::Auth(_) => auth,
            other => CommvaultError::Auth(other.to_string()),
        })
    }

    async fn login_inner(&self) -> Result<String> {
        let url = format!("{}/Login", self.base_url);
        debug!(target_name = %self.config.name, "Logging in at {}", url);

        let body = LoginRequest {
            username: &self.config.username,
            password: base64::engine::general_purpose::STANDARD
                .encode(self.config.password.as_bytes()),
        };

        let request = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&body);
        let response = check_status(self.send(request).await?)?;

        let login: LoginResponse = parse_body(response, "login response").await?;
        match login.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => {
                let reason = login
                    .err_list
                    .into_iter()
                    .find_map(|e| e.err_log_message)
                    .unwrap_or_else(|| "login response did not contain a token".to_string());
                Err(CommvaultError::Auth(reason))
            }
        }
    }

    /// Get backup jobs finished within the lookback window, plus running ones.
    ///
    /// Only VSA and SQL Server jobs are returned; other agent types are
    /// skipped.
    pub async fn fetch_jobs(&self, token: &str) -> Result<Vec<JobRecord>> {
        let query = [
            (
                "completedJobLookupTime",
                self.config.job_lookback_seconds.to_string(),
            ),
            ("limit", self.config.job_limit.to_string()),
            ("jobFilter", "Backup".to_string()),
        ];
        let response: JobListResponse = self.get("/Job", &query, token).await?;

        let total = response.jobs.len();
        let records: Vec<JobRecord> = response
            .jobs
            .into_iter()
            .filter_map(|entry| JobRecord::from_summary(entry.job_summary))
            .collect();

        debug!(
            target_name = %self.config.name,
            "Fetched {} jobs, {} VSA/SQL",
            total,
            records.len()
        );
        Ok(records)
    }

    /// Get VM pseudo-client and SQL instance status.
    pub async fn fetch_clients(&self, token: &str) -> Result<Vec<ClientStatus>> {
        let sql_query = [("applicationId", SQL_SERVER_APP_ID.to_string())];
        let (vms, instances) = tokio::try_join!(
            self.get::<VmPseudoClientList>("/Client/VMPseudoClient", &[], token),
            self.get::<InstanceList>("/Instance", &sql_query, token),
        )?;

        let mut statuses: Vec<ClientStatus> = vms
            .clients
            .into_iter()
            .map(ClientStatus::from_vm)
            .collect();
        statuses.extend(instances.instances.into_iter().map(ClientStatus::from_sql));

        debug!(
            target_name = %self.config.name,
            "Fetched {} VM/SQL client statuses",
            statuses.len()
        );
        Ok(statuses)
    }

    /// Get CommServe identity. Configured display metadata wins over the API.
    pub async fn fetch_system_info(&self, token: &str) -> Result<SystemInfo> {
        let response: CommServResponse = self.get("/CommServ", &[], token).await?;

        Ok(SystemInfo {
            commserve_name: self
                .config
                .commserve_name
                .clone()
                .unwrap_or(response.commcell.comm_cell_name),
            version: self
                .config
                .version
                .clone()
                .unwrap_or(response.cs_version_info),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(target_name = %self.config.name, "Fetching {}", url);

        let request = self
            .client
            .get(&url)
            .query(query)
            .header("Authtoken", token)
            .header("Accept", "application/json");
        let response = check_status(self.send(request).await?)?;

        parse_body(response, path).await
    }

    /// Send a request, retrying once when no response was received at all.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let retry = request.try_clone();
        match request.send().await {
            Ok(response) => Ok(response),
            Err(e) if is_transient(&e) => match retry {
                Some(retry) => {
                    warn!(
                        target_name = %self.config.name,
                        "Request failed before a response arrived, retrying once: {}",
                        e
                    );
                    Ok(retry.send().await?)
                }
                None => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }
}

/// Transport failure before any response status: refused or reset
/// connection, or timeout.
fn is_transient(e: &reqwest::Error) -> bool {
    e.status().is_none() && (e.is_connect() || e.is_timeout() || e.is_request())
}

/// Map non-2xx responses to typed errors.
fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    warn!("Commvault API {} returned {}", response.url().path(), status);
    if status == StatusCode::UNAUTHORIZED {
        Err(CommvaultError::Auth(
            "Commvault API rejected the session token (HTTP 401)".to_string(),
        ))
    } else {
        Err(CommvaultError::Upstream {
            status: status.as_u16(),
        })
    }
}

async fn parse_body<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        CommvaultError::Parse(format!("{}: {}. Body preview: {}", what, e, preview))
    })
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "errList", default)]
    err_list: Vec<ApiErrorEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorEntry {
    #[serde(default)]
    err_log_message: Option<String>,
}

/// `GET /Job` body. A missing `jobs` key means no jobs matched.
#[derive(Debug, Deserialize)]
struct JobListResponse {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobEntry {
    job_summary: JobSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSummary {
    job_id: u64,
    app_type_name: String,
    status: String,
    job_elapsed_time: f64,
    #[serde(default)]
    job_type: Option<String>,
    #[serde(default)]
    job_start_time: Option<f64>,
    #[serde(default)]
    job_end_time: Option<f64>,
    #[serde(default)]
    size_of_application: Option<f64>,
    #[serde(default)]
    size_of_media_on_disk: Option<f64>,
    #[serde(default)]
    total_failed_files: Option<u64>,
    #[serde(default)]
    percent_complete: Option<f64>,
    #[serde(default)]
    subclient: Option<SubclientRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubclientRef {
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    subclient_name: Option<String>,
}

/// Backup agent family a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobKind {
    /// Virtual Server Agent (VM-level) backup
    Vsa,
    /// SQL Server (database-level) backup
    Sql,
}

impl JobKind {
    /// Classify a Commvault `appTypeName`.
    pub fn from_app_type(app_type: &str) -> Option<Self> {
        match app_type.trim().to_ascii_lowercase().as_str() {
            "virtual server" => Some(Self::Vsa),
            "sql server" => Some(Self::Sql),
            _ => None,
        }
    }

    /// Value of the `kind` label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vsa => "VSA",
            Self::Sql => "SQL",
        }
    }
}

/// Outcome of a job as far as monitoring is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
    Running,
}

impl JobStatus {
    /// Classify a Commvault job status string.
    ///
    /// Anything that is neither clean completion nor in progress counts as a
    /// failure, including "Completed w/ one or more errors".
    pub fn from_upstream(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Success,
            "running" | "waiting" | "pending" | "queued" | "suspended" => Self::Running,
            _ => Self::Failure,
        }
    }
}

/// One VSA or SQL backup job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: u64,
    pub kind: JobKind,
    pub status: JobStatus,
    pub duration_seconds: f64,
    pub job_type: Option<String>,
    pub client_name: Option<String>,
    pub subclient_name: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub size_application_bytes: Option<f64>,
    pub size_media_bytes: Option<f64>,
    pub failed_files: Option<u64>,
    pub percent_complete: Option<f64>,
}

impl JobRecord {
    /// Create a job with only the required fields set.
    pub fn new(job_id: u64, kind: JobKind, status: JobStatus, duration_seconds: f64) -> Self {
        Self {
            job_id,
            kind,
            status,
            duration_seconds,
            job_type: None,
            client_name: None,
            subclient_name: None,
            start_time: None,
            end_time: None,
            size_application_bytes: None,
            size_media_bytes: None,
            failed_files: None,
            percent_complete: None,
        }
    }

    fn from_summary(summary: JobSummary) -> Option<Self> {
        let Some(kind) = JobKind::from_app_type(&summary.app_type_name) else {
            debug!(
                "Skipping job {} with agent type '{}'",
                summary.job_id, summary.app_type_name
            );
            return None;
        };

        let (client_name, subclient_name) = match summary.subclient {
            Some(s) => (s.client_name, s.subclient_name),
            None => (None, None),
        };

        Some(Self {
            job_id: summary.job_id,
            kind,
            status: JobStatus::from_upstream(&summary.status),
            duration_seconds: summary.job_elapsed_time,
            job_type: summary.job_type,
            client_name,
            subclient_name,
            // Commvault reports 0 for timestamps that do not exist yet
            start_time: summary.job_start_time.filter(|t| *t > 0.0),
            end_time: summary.job_end_time.filter(|t| *t > 0.0),
            size_application_bytes: summary.size_of_application,
            size_media_bytes: summary.size_of_media_on_disk,
            failed_files: summary.total_failed_files,
            percent_complete: summary.percent_complete,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VmPseudoClientList {
    #[serde(rename = "VSPseudoClientsList", default)]
    clients: Vec<VmPseudoClient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VmPseudoClient {
    client: ClientEntity,
    status_info: StatusInfo,
    #[serde(default)]
    client_activity_control: Option<ActivityControl>,
    #[serde(default)]
    last_backup_job_info: Option<LastBackupJobInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientEntity {
    client_id: u64,
    client_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusInfo {
    status: i64,
    #[serde(default)]
    status_string: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityControl {
    #[serde(default)]
    activity_control_options: Vec<ActivityOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityOption {
    activity_type: i64,
    enable_activity_type: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastBackupJobInfo {
    #[serde(default)]
    job_elapsed_time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    #[serde(rename = "instanceProperties", default)]
    instances: Vec<SqlInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlInstance {
    instance: InstanceEntity,
    status_info: StatusInfo,
    #[serde(default)]
    last_backup_job_info: Option<LastBackupJobInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceEntity {
    instance_id: u64,
    instance_name: String,
    client_name: String,
}

/// Kind of protected entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientCategory {
    Vm,
    Sql,
}

impl ClientCategory {
    /// Value of the `category` label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vm => "vm",
            Self::Sql => "sql",
        }
    }
}

/// Whether an activity type (backup, restore, ...) is enabled on a VM client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityFlag {
    pub activity_type: i64,
    pub enabled: bool,
}

/// Status of one VM pseudo-client or SQL instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub category: ClientCategory,
    pub id: u64,
    pub name: String,
    pub status_code: i64,
    pub status_text: Option<String>,
    pub last_backup_duration_seconds: Option<f64>,
    pub activity: Vec<ActivityFlag>,
}

impl ClientStatus {
    /// Status codes 0 and 1, or a "configured" status string, are healthy.
    pub fn is_healthy(&self) -> bool {
        matches!(self.status_code, 0 | 1)
            || self
                .status_text
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("configured"))
    }

    fn from_vm(vm: VmPseudoClient) -> Self {
        Self {
            category: ClientCategory::Vm,
            id: vm.client.client_id,
            name: vm.client.client_name,
            status_code: vm.status_info.status,
            status_text: vm.status_info.status_string,
            last_backup_duration_seconds: vm.last_backup_job_info.and_then(|j| j.job_elapsed_time),
            activity: vm
                .client_activity_control
                .map(|control| {
                    control
                        .activity_control_options
                        .into_iter()
                        .map(|option| ActivityFlag {
                            activity_type: option.activity_type,
                            enabled: option.enable_activity_type,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn from_sql(sql: SqlInstance) -> Self {
        Self {
            category: ClientCategory::Sql,
            id: sql.instance.instance_id,
            name: format!("{}/{}", sql.instance.client_name, sql.instance.instance_name),
            status_code: sql.status_info.status,
            status_text: sql.status_info.status_string,
            last_backup_duration_seconds: sql
                .last_backup_job_info
                .and_then(|j| j.job_elapsed_time),
            activity: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommServResponse {
    commcell: Commcell,
    cs_version_info: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Commcell {
    comm_cell_name: String,
}

/// CommServe identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub commserve_name: String,
    pub version: String,
}

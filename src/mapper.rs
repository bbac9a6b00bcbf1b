//! Pure mapping from Commvault payloads to metric samples.
//!
//! Job status encoding: finished jobs report 1 (success) or 0 (failure) in
//! `*_job_status`. Jobs still in progress are left out of `*_job_status` and
//! reported in `*_job_running` instead, so they are neither counted as
//! healthy nor as broken.

use crate::client::{ClientStatus, JobKind, JobRecord, JobStatus, SystemInfo};
use crate::config::Category;
use crate::metrics::{Family, MetricSample};
use std::time::Duration;

pub static SCRAPE_SUCCESS: Family = Family::gauge(
    "commvault_scrape_success",
    "Whether every enabled category was collected (1 for success, 0 for failure)",
);
pub static SCRAPE_DURATION: Family = Family::gauge(
    "commvault_scrape_duration_seconds",
    "Time spent collecting from the Commvault API",
);
pub static CATEGORY_SUCCESS: Family = Family::gauge(
    "commvault_scrape_category_success",
    "Whether a metric category was collected (1 for success, 0 for failure)",
);

pub static INFO: Family = Family::gauge("commvault_info", "Commvault CommServe information");

pub static CLIENT_STATUS: Family = Family::gauge(
    "commvault_client_status",
    "Status of VM pseudo-clients and SQL instances (1 healthy, 0 otherwise)",
);
pub static CLIENT_LAST_BACKUP_DURATION: Family = Family::gauge(
    "commvault_client_last_backup_duration_seconds",
    "Duration of the last backup job of a VM pseudo-client or SQL instance",
);
pub static VM_ACTIVITY_CONTROL: Family = Family::gauge(
    "commvault_vm_client_activity_control",
    "Whether an activity type is enabled on a VM pseudo-client",
);

/// Families emitted for one job kind.
pub struct JobFamilies {
    pub status: Family,
    pub running: Family,
    pub duration: Family,
    pub info: Family,
    pub start_time: Family,
    pub end_time: Family,
    pub size_application: Family,
    pub size_media: Family,
    pub failed_files: Family,
    pub percent_complete: Family,
}

pub static VSA_JOB: JobFamilies = JobFamilies {
    status: Family::gauge(
        "commvault_vsa_job_status",
        "Finished VSA job status (1 success, 0 failure)",
    ),
    running: Family::gauge("commvault_vsa_job_running", "VSA job currently in progress"),
    duration: Family::gauge(
        "commvault_vsa_job_duration_seconds",
        "VSA job elapsed time in seconds",
    ),
    info: Family::gauge("commvault_vsa_job_info", "VSA job client and subclient"),
    start_time: Family::gauge(
        "commvault_vsa_job_start_time_seconds",
        "VSA job start time (Unix timestamp)",
    ),
    end_time: Family::gauge(
        "commvault_vsa_job_end_time_seconds",
        "VSA job end time (Unix timestamp)",
    ),
    size_application: Family::gauge(
        "commvault_vsa_job_size_application_bytes",
        "Size of the application data processed by a VSA job",
    ),
    size_media: Family::gauge(
        "commvault_vsa_job_size_media_bytes",
        "Size of media on disk written by a VSA job",
    ),
    failed_files: Family::gauge(
        "commvault_vsa_job_failed_files",
        "Number of files a VSA job failed to protect",
    ),
    percent_complete: Family::gauge(
        "commvault_vsa_job_percent_complete",
        "Completion percentage of a running VSA job",
    ),
};

pub static SQL_JOB: JobFamilies = JobFamilies {
    status: Family::gauge(
        "commvault_sql_job_status",
        "Finished SQL job status (1 success, 0 failure)",
    ),
    running: Family::gauge("commvault_sql_job_running", "SQL job currently in progress"),
    duration: Family::gauge(
        "commvault_sql_job_duration_seconds",
        "SQL job elapsed time in seconds",
    ),
    info: Family::gauge("commvault_sql_job_info", "SQL job client and subclient"),
    start_time: Family::gauge(
        "commvault_sql_job_start_time_seconds",
        "SQL job start time (Unix timestamp)",
    ),
    end_time: Family::gauge(
        "commvault_sql_job_end_time_seconds",
        "SQL job end time (Unix timestamp)",
    ),
    size_application: Family::gauge(
        "commvault_sql_job_size_application_bytes",
        "Size of the application data processed by a SQL job",
    ),
    size_media: Family::gauge(
        "commvault_sql_job_size_media_bytes",
        "Size of media on disk written by a SQL job",
    ),
    failed_files: Family::gauge(
        "commvault_sql_job_failed_files",
        "Number of files a SQL job failed to protect",
    ),
    percent_complete: Family::gauge(
        "commvault_sql_job_percent_complete",
        "Completion percentage of a running SQL job",
    ),
};

const UNKNOWN: &str = "unknown";

/// Families for a job kind.
pub fn job_families(kind: JobKind) -> &'static JobFamilies {
    match kind {
        JobKind::Vsa => &VSA_JOB,
        JobKind::Sql => &SQL_JOB,
    }
}

/// Samples for a list of jobs.
pub fn map_jobs(jobs: &[JobRecord]) -> Vec<MetricSample> {
    let mut samples = Vec::with_capacity(jobs.len() * 4);

    for job in jobs {
        let families = job_families(job.kind);
        let job_id = job.job_id.to_string();
        let kind = job.kind.as_str();
        let labels = || [("job_id", job_id.clone()), ("kind", kind.to_string())];

        match job.status {
            JobStatus::Success => samples.push(MetricSample::new(&families.status, labels(), 1.0)),
            JobStatus::Failure => samples.push(MetricSample::new(&families.status, labels(), 0.0)),
            JobStatus::Running => {
                samples.push(MetricSample::new(&families.running, labels(), 1.0));
                if let Some(percent) = job.percent_complete {
                    samples.push(MetricSample::new(&families.percent_complete, labels(), percent));
                }
            }
        }

        samples.push(MetricSample::new(
            &families.duration,
            labels(),
            job.duration_seconds,
        ));

        samples.push(MetricSample::new(
            &families.info,
            [
                ("job_id", job_id.clone()),
                ("kind", kind.to_string()),
                ("job_type", label_or_unknown(job.job_type.as_deref())),
                ("client_name", label_or_unknown(job.client_name.as_deref())),
                ("subclient_name", label_or_unknown(job.subclient_name.as_deref())),
            ],
            1.0,
        ));

        let optional = [
            (&families.start_time, job.start_time),
            (
                &families.end_time,
                job.end_time.filter(|_| job.status != JobStatus::Running),
            ),
            (&families.size_application, job.size_application_bytes),
            (&families.size_media, job.size_media_bytes),
            (&families.failed_files, job.failed_files.map(|n| n as f64)),
        ];
        for (family, value) in optional {
            if let Some(value) = value {
                samples.push(MetricSample::new(family, labels(), value));
            }
        }
    }

    samples
}

/// Samples for VM pseudo-client and SQL instance status.
pub fn map_clients(clients: &[ClientStatus]) -> Vec<MetricSample> {
    let mut samples = Vec::with_capacity(clients.len() * 2);

    for client in clients {
        let labels = || {
            [
                ("category", client.category.as_str().to_string()),
                ("entity_id", client.id.to_string()),
                ("entity_name", client.name.clone()),
            ]
        };

        let healthy = if client.is_healthy() { 1.0 } else { 0.0 };
        samples.push(MetricSample::new(&CLIENT_STATUS, labels(), healthy));

        if let Some(duration) = client.last_backup_duration_seconds {
            samples.push(MetricSample::new(
                &CLIENT_LAST_BACKUP_DURATION,
                labels(),
                duration,
            ));
        }

        for flag in &client.activity {
            samples.push(MetricSample::new(
                &VM_ACTIVITY_CONTROL,
                [
                    ("client_id", client.id.to_string()),
                    ("activity_type", flag.activity_type.to_string()),
                ],
                if flag.enabled { 1.0 } else { 0.0 },
            ));
        }
    }

    samples
}

/// Identity marker sample.
pub fn map_system_info(info: &SystemInfo) -> Vec<MetricSample> {
    vec![MetricSample::new(
        &INFO,
        [
            ("commserve_name", info.commserve_name.clone()),
            ("version", info.version.clone()),
        ],
        1.0,
    )]
}

/// Probe-level samples: overall success, duration and per-category success.
pub fn map_scrape(outcomes: &[(Category, bool)], duration: Duration) -> Vec<MetricSample> {
    let all_ok = outcomes.iter().all(|(_, ok)| *ok);

    let mut samples = vec![
        MetricSample::scalar(&SCRAPE_SUCCESS, if all_ok { 1.0 } else { 0.0 }),
        MetricSample::scalar(&SCRAPE_DURATION, duration.as_secs_f64()),
    ];
    samples.extend(outcomes.iter().map(|(category, ok)| {
        MetricSample::new(
            &CATEGORY_SUCCESS,
            [("category", category.as_str())],
            if *ok { 1.0 } else { 0.0 },
        )
    }));

    samples
}

fn label_or_unknown(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ActivityFlag, ClientCategory};
    use crate::metrics::ProbeRegistry;

    #[test]
    fn test_job_status_and_duration() {
        let jobs = vec![
            JobRecord::new(1001, JobKind::Vsa, JobStatus::Success, 120.0),
            JobRecord::new(1002, JobKind::Vsa, JobStatus::Failure, 300.0),
        ];
        let registry = ProbeRegistry::from_samples(map_jobs(&jobs));

        let status = registry.family("commvault_vsa_job_status").unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(
            registry.value("commvault_vsa_job_status", &[("job_id", "1001")]),
            Some(1.0)
        );
        assert_eq!(
            registry.value("commvault_vsa_job_status", &[("job_id", "1002")]),
            Some(0.0)
        );
        assert_eq!(
            registry.value("commvault_vsa_job_duration_seconds", &[("job_id", "1002")]),
            Some(300.0)
        );
        assert!(registry.family("commvault_sql_job_status").is_none());
    }

    #[test]
    fn test_running_job_uses_dedicated_family() {
        let mut job = JobRecord::new(7, JobKind::Sql, JobStatus::Running, 30.0);
        job.percent_complete = Some(40.0);
        job.end_time = Some(1_700_000_000.0);
        let registry = ProbeRegistry::from_samples(map_jobs(&[job]));

        assert!(registry.family("commvault_sql_job_status").is_none());
        assert_eq!(
            registry.value("commvault_sql_job_running", &[("job_id", "7"), ("kind", "SQL")]),
            Some(1.0)
        );
        assert_eq!(
            registry.value("commvault_sql_job_percent_complete", &[("job_id", "7")]),
            Some(40.0)
        );
        assert!(registry.family("commvault_sql_job_end_time_seconds").is_none());
    }

    #[test]
    fn test_job_info_defaults_unknown_labels() {
        let mut job = JobRecord::new(5, JobKind::Vsa, JobStatus::Success, 1.0);
        job.client_name = Some("hv01".to_string());
        let samples = map_jobs(&[job]);
        let info = samples
            .iter()
            .find(|s| s.name() == "commvault_vsa_job_info")
            .unwrap();

        assert_eq!(info.label("client_name"), Some("hv01"));
        assert_eq!(info.label("subclient_name"), Some("unknown"));
        let keys: Vec<_> = info.labels().iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["client_name", "job_id", "job_type", "kind", "subclient_name"]
        );
    }

    #[test]
    fn test_client_status_samples() {
        let clients = vec![
            ClientStatus {
                category: ClientCategory::Vm,
                id: 12,
                name: "vcenter01".to_string(),
                status_code: 0,
                status_text: None,
                last_backup_duration_seconds: Some(95.0),
                activity: vec![ActivityFlag {
                    activity_type: 1,
                    enabled: false,
                }],
            },
            ClientStatus {
                category: ClientCategory::Sql,
                id: 3,
                name: "sql01/MSSQLSERVER".to_string(),
                status_code: 5,
                status_text: None,
                last_backup_duration_seconds: None,
                activity: Vec::new(),
            },
        ];
        let registry = ProbeRegistry::from_samples(map_clients(&clients));

        assert_eq!(
            registry.value("commvault_client_status", &[("category", "vm"), ("entity_id", "12")]),
            Some(1.0)
        );
        assert_eq!(
            registry.value("commvault_client_status", &[("category", "sql"), ("entity_id", "3")]),
            Some(0.0)
        );
        assert_eq!(
            registry
                .family("commvault_client_last_backup_duration_seconds")
                .map(<[_]>::len),
            Some(1)
        );
        assert_eq!(
            registry.value(
                "commvault_vm_client_activity_control",
                &[("client_id", "12"), ("activity_type", "1")]
            ),
            Some(0.0)
        );
    }

    #[test]
    fn test_scrape_success_requires_all_categories() {
        let ok = ProbeRegistry::from_samples(map_scrape(
            &[(Category::Jobs, true), (Category::SystemInfo, true)],
            Duration::from_millis(1500),
        ));
        assert_eq!(ok.value("commvault_scrape_success", &[]), Some(1.0));
        assert_eq!(ok.value("commvault_scrape_duration_seconds", &[]), Some(1.5));

        let partial = ProbeRegistry::from_samples(map_scrape(
            &[(Category::Jobs, false), (Category::Clients, true)],
            Duration::ZERO,
        ));
        assert_eq!(partial.value("commvault_scrape_success", &[]), Some(0.0));
        assert_eq!(
            partial.value("commvault_scrape_category_success", &[("category", "jobs")]),
            Some(0.0)
        );
        assert_eq!(
            partial.value("commvault_scrape_category_success", &[("category", "clients")]),
            Some(1.0)
        );
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let jobs = vec![
            JobRecord::new(2, JobKind::Sql, JobStatus::Success, 5.0),
            JobRecord::new(1, JobKind::Vsa, JobStatus::Failure, 9.0),
        ];
        assert_eq!(map_jobs(&jobs), map_jobs(&jobs.clone()));
    }
}

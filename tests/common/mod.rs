//! Shared fixtures: a mockito server standing in for the Commvault API.
#![allow(dead_code)]

use commvault_exporter::config::{ProbeConfig, TargetConfig};
use commvault_exporter::probe::Prober;
use commvault_exporter::targets::TargetRegistry;
use mockito::{Matcher, Mock, ServerGuard};

pub const TOKEN: &str = "QSDK test-token";

pub const JOBS_BODY: &str = r#"{
    "totalRecordsWithoutPaging": 3,
    "jobs": [
        {"jobSummary": {
            "jobId": 1001, "appTypeName": "Virtual Server", "jobType": "Backup",
            "status": "Completed", "jobElapsedTime": 120,
            "jobStartTime": 1703635200, "jobEndTime": 1703635320,
            "sizeOfApplication": 1073741824, "sizeOfMediaOnDisk": 536870912,
            "totalFailedFiles": 0,
            "subclient": {"clientName": "vcenter01", "subclientName": "default"}
        }},
        {"jobSummary": {
            "jobId": 1002, "appTypeName": "Virtual Server", "jobType": "Backup",
            "status": "Failed", "jobElapsedTime": 300
        }},
        {"jobSummary": {
            "jobId": 1003, "appTypeName": "Windows File System",
            "status": "Completed", "jobElapsedTime": 10
        }}
    ]
}"#;

pub const VM_BODY: &str = r#"{
    "VSPseudoClientsList": [
        {
            "client": {"clientId": 12, "clientName": "vcenter01"},
            "statusInfo": {"status": 0, "statusString": "Configured"},
            "clientActivityControl": {"activityControlOptions": [
                {"activityType": 1, "enableActivityType": true},
                {"activityType": 2, "enableActivityType": false}
            ]}
        }
    ]
}"#;

pub const SQL_BODY: &str = r#"{
    "instanceProperties": [
        {
            "instance": {"instanceId": 3, "instanceName": "MSSQLSERVER", "clientName": "sql01"},
            "statusInfo": {"status": 0},
            "lastBackupJobInfo": {"jobElapsedTime": 42}
        }
    ]
}"#;

pub const COMMSERV_BODY: &str = r#"{"commcell": {"commCellName": "cs01"}, "csVersionInfo": "11.32.45"}"#;

/// Target pointing at the mock server.
pub fn target(name: &str, url: &str) -> TargetConfig {
    let mut target = TargetConfig::new(name, url, "admin", "secret");
    target.timeout_seconds = 5;
    target
}

pub fn prober(targets: Vec<TargetConfig>) -> Prober {
    prober_with(targets, ProbeConfig::default())
}

pub fn prober_with(targets: Vec<TargetConfig>, config: ProbeConfig) -> Prober {
    Prober::new(TargetRegistry::new(targets), config).unwrap()
}

pub async fn mock_login(server: &mut ServerGuard, expected: usize) -> Mock {
    server
        .mock("POST", "/Login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(r#"{{"token": "{}", "userName": "admin"}}"#, TOKEN))
        .expect(expected)
        .create_async()
        .await
}

/// Job listing mock, not yet created so callers can add expectations.
pub fn jobs_mock(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
    server
        .mock("GET", "/Job")
        .match_query(Matcher::Any)
        .match_header("Authtoken", TOKEN)
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
}

pub async fn mock_jobs(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
    jobs_mock(server, status, body).create_async().await
}

pub async fn mock_clients(server: &mut ServerGuard) -> (Mock, Mock) {
    let vms = server
        .mock("GET", "/Client/VMPseudoClient")
        .match_query(Matcher::Any)
        .match_header("Authtoken", TOKEN)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(VM_BODY)
        .create_async()
        .await;
    let sql = server
        .mock("GET", "/Instance")
        .match_query(Matcher::UrlEncoded(
            "applicationId".to_string(),
            "81".to_string(),
        ))
        .match_header("Authtoken", TOKEN)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(SQL_BODY)
        .create_async()
        .await;
    (vms, sql)
}

pub async fn mock_commserv(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", "/CommServ")
        .match_query(Matcher::Any)
        .match_header("Authtoken", TOKEN)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(COMMSERV_BODY)
        .create_async()
        .await
}

/// Mocks of a fully healthy target. Mockito removes a mock when it is
/// dropped, so keep this alive for the duration of the test.
pub struct HealthyTarget {
    pub login: Mock,
    pub jobs: Mock,
    pub vms: Mock,
    pub sql: Mock,
    pub commserv: Mock,
}

pub async fn mock_healthy_target(server: &mut ServerGuard, expected_logins: usize) -> HealthyTarget {
    let login = mock_login(server, expected_logins).await;
    let jobs = mock_jobs(server, 200, JOBS_BODY).await;
    let (vms, sql) = mock_clients(server).await;
    let commserv = mock_commserv(server).await;
    HealthyTarget {
        login,
        jobs,
        vms,
        sql,
        commserv,
    }
}

//! Link lookups between Chutney entities and Jira issues.
//!
//! Test-execution contents are provided by a [`TestExecutionSource`]; this
//! crate does not talk to Jira itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::jira_store::{JiraFileStore, LinkKind};
use crate::json_file::StoreError;
use crate::logging;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraLink {
    pub id: String,
    pub chutney_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<String>,
}

impl JiraLink {
    pub fn new(chutney_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chutney_id: chutney_id.into(),
            execution_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraTestExecution {
    pub id: String,
    pub jira_scenarios: Vec<JiraLink>,
}

/// One test of a Jira test execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestExecutionTest {
    pub key: String,
    pub status: Option<String>,
}

pub trait TestExecutionSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn test_execution_tests(&self, test_exec_id: &str)
        -> Result<Vec<TestExecutionTest>, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("empty campaign execution id")]
    EmptyCampaignExecutionId,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to list tests of test execution {test_exec_id}: {source}")]
    Source {
        test_exec_id: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug)]
pub struct JiraLinks<'a> {
    store: &'a JiraFileStore,
}

impl<'a> JiraLinks<'a> {
    pub fn new(store: &'a JiraFileStore) -> Self {
        Self { store }
    }

    pub fn scenario_link(&self, scenario_id: &str) -> Result<JiraLink, LinkError> {
        self.link(LinkKind::Scenario, scenario_id)
    }

    pub fn campaign_link(&self, campaign_id: &str) -> Result<JiraLink, LinkError> {
        self.link(LinkKind::Campaign, campaign_id)
    }

    fn link(&self, kind: LinkKind, chutney_id: &str) -> Result<JiraLink, LinkError> {
        let id = self.store.get_by_id(kind, chutney_id)?;
        Ok(JiraLink::new(chutney_id, id))
    }

    /// Saves the link; an empty Jira id unlinks.
    pub fn link_scenario(&self, link: &JiraLink) -> Result<JiraLink, LinkError> {
        self.store.save(LinkKind::Scenario, &link.chutney_id, &link.id)?;
        Ok(JiraLink::new(link.chutney_id.clone(), link.id.clone()))
    }

    pub fn link_campaign(&self, link: &JiraLink) -> Result<JiraLink, LinkError> {
        self.store.save(LinkKind::Campaign, &link.chutney_id, &link.id)?;
        Ok(JiraLink::new(link.chutney_id.clone(), link.id.clone()))
    }

    pub fn unlink_scenario(&self, scenario_id: &str) -> Result<(), LinkError> {
        Ok(self.store.remove(LinkKind::Scenario, scenario_id)?)
    }

    pub fn unlink_campaign(&self, campaign_id: &str) -> Result<(), LinkError> {
        Ok(self.store.remove(LinkKind::Campaign, campaign_id)?)
    }

    /// Linked scenarios that are part of the test execution, each carrying
    /// the status of its Jira test.
    pub fn scenarios_for_test_execution<S: TestExecutionSource>(
        &self,
        test_exec_id: &str,
        source: &S,
    ) -> Result<Vec<JiraLink>, LinkError> {
        if test_exec_id.is_empty() {
            return Ok(Vec::new());
        }

        let tests: HashMap<String, TestExecutionTest> = source
            .test_execution_tests(test_exec_id)
            .map_err(|err| LinkError::Source {
                test_exec_id: test_exec_id.to_string(),
                source: Box::new(err),
            })?
            .into_iter()
            .map(|test| (test.key.clone(), test))
            .collect();

        let linked = self.store.get_all(LinkKind::Scenario)?;
        let matched: Vec<JiraLink> = linked
            .into_iter()
            .filter_map(|(chutney_id, jira_id)| {
                let test = tests.get(&jira_id)?;
                Some(JiraLink {
                    execution_status: test.status.clone(),
                    ..JiraLink::new(chutney_id, jira_id)
                })
            })
            .collect();

        logging::debug(format!(
            "test execution {} has {} tests, {} linked scenarios",
            test_exec_id,
            tests.len(),
            matched.len()
        ));
        Ok(matched)
    }

    pub fn scenarios_for_campaign_execution<S: TestExecutionSource>(
        &self,
        campaign_execution_id: &str,
        source: &S,
    ) -> Result<JiraTestExecution, LinkError> {
        if campaign_execution_id.is_empty() {
            return Err(LinkError::EmptyCampaignExecutionId);
        }

        let test_exec_id = self
            .store
            .get_by_id(LinkKind::CampaignExecution, campaign_execution_id)?;
        let jira_scenarios = self.scenarios_for_test_execution(&test_exec_id, source)?;
        Ok(JiraTestExecution {
            id: test_exec_id,
            jira_scenarios,
        })
    }

    pub fn configuration_url(&self) -> Result<String, LinkError> {
        Ok(self.store.load_server_configuration()?.url)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;

    use super::*;
    use crate::json_file::fixture_dir;
    use crate::metrics::Metrics;

    #[derive(Debug, thiserror::Error)]
    #[error("jira unreachable")]
    struct Unreachable;

    struct FixedTests {
        tests: Vec<TestExecutionTest>,
        calls: Cell<usize>,
    }

    impl TestExecutionSource for FixedTests {
        type Error = Unreachable;

        fn test_execution_tests(&self, _id: &str) -> Result<Vec<TestExecutionTest>, Unreachable> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.tests.clone())
        }
    }

    struct Down;

    impl TestExecutionSource for Down {
        type Error = Unreachable;

        fn test_execution_tests(&self, _id: &str) -> Result<Vec<TestExecutionTest>, Unreachable> {
            Err(Unreachable)
        }
    }

    fn source() -> FixedTests {
        FixedTests {
            tests: vec![
                TestExecutionTest {
                    key: "JIRA-1".into(),
                    status: Some("PASS".into()),
                },
                TestExecutionTest {
                    key: "JIRA-3".into(),
                    status: None,
                },
            ],
            calls: Cell::new(0),
        }
    }

    fn store(label: &str) -> JiraFileStore {
        JiraFileStore::open(fixture_dir(label), Arc::new(Metrics::new())).expect("open store")
    }

    #[test]
    fn unlinked_scenario_has_empty_jira_id() {
        let store = store("service-unlinked");
        let links = JiraLinks::new(&store);
        assert_eq!(
            links.scenario_link("12").expect("link"),
            JiraLink::new("12", "")
        );
    }

    #[test]
    fn link_then_unlink_campaign() {
        let store = store("service-campaign");
        let links = JiraLinks::new(&store);
        let saved = links
            .link_campaign(&JiraLink::new("4", "CAMP-4"))
            .expect("link");
        assert_eq!(saved, JiraLink::new("4", "CAMP-4"));
        assert_eq!(links.campaign_link("4").expect("get").id, "CAMP-4");

        links.unlink_campaign("4").expect("unlink");
        assert_eq!(links.campaign_link("4").expect("get").id, "");
    }

    #[test]
    fn test_execution_keeps_only_linked_tests() {
        let store = store("service-test-exec");
        let links = JiraLinks::new(&store);
        links.link_scenario(&JiraLink::new("1", "JIRA-1")).expect("link");
        links.link_scenario(&JiraLink::new("2", "JIRA-2")).expect("link");
        links.link_scenario(&JiraLink::new("3", "JIRA-3")).expect("link");

        let found = links
            .scenarios_for_test_execution("EXEC-1", &source())
            .expect("lookup");

        assert_eq!(
            found,
            vec![
                JiraLink {
                    id: "JIRA-1".into(),
                    chutney_id: "1".into(),
                    execution_status: Some("PASS".into()),
                },
                JiraLink::new("3", "JIRA-3"),
            ]
        );
    }

    #[test]
    fn empty_test_execution_id_skips_the_source() {
        let store = store("service-empty-exec");
        let links = JiraLinks::new(&store);
        let source = source();

        assert!(links
            .scenarios_for_test_execution("", &source)
            .expect("lookup")
            .is_empty());
        assert_eq!(source.calls.get(), 0);
    }

    #[test]
    fn campaign_execution_resolves_linked_test_execution() {
        let store = store("service-campaign-exec");
        store
            .save(LinkKind::CampaignExecution, "100", "EXEC-9")
            .expect("link exec");
        let links = JiraLinks::new(&store);
        links.link_scenario(&JiraLink::new("1", "JIRA-1")).expect("link");

        let exec = links
            .scenarios_for_campaign_execution("100", &source())
            .expect("lookup");
        assert_eq!(exec.id, "EXEC-9");
        assert_eq!(exec.jira_scenarios.len(), 1);

        let unlinked = links
            .scenarios_for_campaign_execution("200", &source())
            .expect("lookup");
        assert_eq!(unlinked.id, "");
        assert!(unlinked.jira_scenarios.is_empty());
    }

    #[test]
    fn empty_campaign_execution_id_is_rejected() {
        let store = store("service-campaign-exec-empty");
        let err = JiraLinks::new(&store)
            .scenarios_for_campaign_execution("", &source())
            .expect_err("should fail");
        assert!(matches!(err, LinkError::EmptyCampaignExecutionId));
    }

    #[test]
    fn source_failure_names_the_test_execution() {
        let store = store("service-source-down");
        let err = JiraLinks::new(&store)
            .scenarios_for_test_execution("EXEC-2", &Down)
            .expect_err("should fail");
        assert!(err.to_string().contains("EXEC-2"));
    }

    #[test]
    fn configuration_url_reads_server_configuration() {
        let store = store("service-config-url");
        let links = JiraLinks::new(&store);
        assert_eq!(links.configuration_url().expect("url"), "");
    }
}

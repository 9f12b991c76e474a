//! Monitoring passes over the configured sites
//!
//! A pass probes every site in order, aggregates each batch, decides whether
//! it should alert and delivers all alerts of the pass as one message. The
//! check path grades every site instead and runs under a wall-clock deadline.

use crate::aggregator::ResultAggregator;
use crate::alerts::{AlertManager, AlertSink};
use crate::config::{Config, Site, SiteList};
use crate::events::Timestamp;
use crate::probe::{Connector, ProbeSession};
use crate::triggers::{AlertDecisionEngine, AlertVerdict, Decision, HealthStatus};
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Regions listed per site in a check report
pub const CHECK_TOP_REGIONS: usize = 3;
/// Regions listed for a single-site check
pub const SINGLE_CHECK_TOP_REGIONS: usize = 10;

/// What happened to one site in a pass
#[derive(Debug, Clone, PartialEq)]
pub enum SiteOutcome {
    /// Probe service returned nothing after all retries
    ApiFailure(Site),
    /// Probe completed and the batch was evaluated
    Evaluated(Decision),
}

/// Result of one monitoring pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    /// Triggered verdicts, in site order
    pub alerts: Vec<AlertVerdict>,
    /// Sites the probe service failed for
    pub api_failures: Vec<Site>,
    /// Sites whose batch held no usable node
    pub no_data: Vec<Site>,
    /// Sites evaluated without an alert
    pub healthy: Vec<Site>,
    /// Sites skipped because they have no URL
    pub skipped: Vec<Site>,
    /// Whether the joined alert message reached the sink
    pub delivered: bool,
}

impl PassSummary {
    fn record(&mut self, outcome: SiteOutcome) {
        match outcome {
            SiteOutcome::ApiFailure(site) => self.api_failures.push(site),
            SiteOutcome::Evaluated(Decision::NoUsableData { site, .. }) => self.no_data.push(site),
            SiteOutcome::Evaluated(Decision::Verdict(verdict)) if verdict.triggered => {
                self.alerts.push(verdict)
            }
            SiteOutcome::Evaluated(Decision::Verdict(verdict)) => self.healthy.push(verdict.site),
        }
    }

    /// Number of sites that were probed
    pub fn probed(&self) -> usize {
        self.alerts.len() + self.api_failures.len() + self.no_data.len() + self.healthy.len()
    }
}

/// Graded result for one site
#[derive(Debug, Clone, PartialEq)]
pub struct CheckEntry {
    pub site: Site,
    pub status: HealthStatus,
    /// Absent when the probe failed or returned no usable node
    pub fail_rate: Option<f64>,
    /// Regions with the most failed nodes, highest first
    pub top_regions: Vec<(String, usize)>,
}

/// Graded results of a check pass
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub started: Timestamp,
    /// Entries in site order; sites not started before the deadline are absent
    pub entries: Vec<CheckEntry>,
    /// Sites that were scheduled
    pub total_sites: usize,
    /// Whether the deadline left sites unchecked
    pub timed_out: bool,
}

impl CheckReport {
    /// Entries graded `status`
    pub fn count(&self, status: HealthStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

/// Drives probe sessions for sites and turns their batches into alerts
pub struct Monitor {
    session: ProbeSession,
    aggregator: ResultAggregator,
    engine: AlertDecisionEngine,
    alerts: AlertManager,
}

impl Monitor {
    /// Build a monitor from configuration
    pub fn new(config: &Config, connector: Arc<dyn Connector>, sink: Arc<dyn AlertSink>) -> Self {
        Self::with_parts(
            ProbeSession::new(config.probe.clone(), connector),
            AlertDecisionEngine::new(config.alerts.threshold()),
            AlertManager::new(sink),
        )
    }

    pub fn with_parts(
        session: ProbeSession,
        engine: AlertDecisionEngine,
        alerts: AlertManager,
    ) -> Self {
        Self {
            session,
            aggregator: ResultAggregator::new(),
            engine,
            alerts,
        }
    }

    /// Probe one site and evaluate its batch
    pub async fn evaluate_site(&self, site: &Site) -> SiteOutcome {
        match self.session.run(&site.url).await {
            None => {
                error!("No probe result for {} ({})", site.name, site.url);
                SiteOutcome::ApiFailure(site.clone())
            }
            Some(batch) => {
                let report = self.aggregator.aggregate(&batch);
                SiteOutcome::Evaluated(self.engine.evaluate(site, report))
            }
        }
    }

    /// Probe every site in order and deliver the pass's alerts together
    pub async fn run_pass(&self, sites: &[Site]) -> PassSummary {
        info!("Starting monitoring pass over {} site(s)", sites.len());
        let mut summary = PassSummary::default();

        for site in sites {
            if site.url.trim().is_empty() {
                warn!("Site {} has no URL, skipping", site.name);
                summary.skipped.push(site.clone());
                continue;
            }
            let outcome = self.evaluate_site(site).await;
            summary.record(outcome);
        }

        summary.delivered = self.alerts.deliver(&summary.alerts).await;

        if !summary.api_failures.is_empty() {
            let names: Vec<&str> = summary.api_failures.iter().map(|s| s.name.as_str()).collect();
            warn!("Probe data unavailable for: {}", names.join(", "));
        }
        if !summary.no_data.is_empty() {
            let names: Vec<&str> = summary.no_data.iter().map(|s| s.name.as_str()).collect();
            warn!("No usable probe data for: {}", names.join(", "));
        }
        if summary.alerts.is_empty() && summary.api_failures.is_empty() && summary.no_data.is_empty()
        {
            info!("All sites healthy");
        }

        summary
    }

    /// Probe and grade one site
    pub async fn check_site(&self, site: &Site) -> CheckEntry {
        self.grade_site(site, CHECK_TOP_REGIONS).await
    }

    /// Probe and grade a URL that need not be configured
    pub async fn check_url(&self, url: &str) -> CheckEntry {
        self.grade_site(&Site::from_url(url), SINGLE_CHECK_TOP_REGIONS)
            .await
    }

    async fn grade_site(&self, site: &Site, top_regions: usize) -> CheckEntry {
        let report = self
            .session
            .run(&site.url)
            .await
            .map(|batch| self.aggregator.aggregate(&batch));

        CheckEntry {
            site: site.clone(),
            status: HealthStatus::grade(report.as_ref()),
            fail_rate: report.as_ref().and_then(|r| r.fail_rate()),
            top_regions: report
                .as_ref()
                .map(|r| {
                    r.top_regions(top_regions)
                        .into_iter()
                        .map(|(region, count)| (region.to_string(), count))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Grade every site on a spawned task bounded by `deadline`
    ///
    /// The deadline is checked before each site starts. A session already
    /// running when it passes is left to finish; the sites after it are
    /// skipped and the report is marked as timed out.
    pub async fn check_all(self: Arc<Self>, sites: Vec<Site>, deadline: Duration) -> CheckReport {
        let started = Utc::now();
        let total_sites = sites.len();
        let cutoff = Instant::now() + deadline;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let monitor = Arc::clone(&self);
        let task = tokio::spawn(async move {
            for site in sites.iter().filter(|s| !s.url.trim().is_empty()) {
                if Instant::now() >= cutoff {
                    warn!(
                        "Check deadline of {:?} reached, skipping {} and later sites",
                        deadline, site.name
                    );
                    return true;
                }
                let entry = monitor.check_site(site).await;
                if tx.send(entry).is_err() {
                    break;
                }
            }
            false
        });

        let timed_out = match task.await {
            Ok(timed_out) => timed_out,
            Err(e) => {
                error!("Check task failed: {}", e);
                false
            }
        };

        let mut entries = Vec::with_capacity(total_sites);
        while let Ok(entry) = rx.try_recv() {
            entries.push(entry);
        }

        info!(
            "Check finished: {} of {} site(s) graded",
            entries.len(),
            total_sites
        );
        CheckReport {
            started,
            entries,
            total_sites,
            timed_out,
        }
    }

    /// Run a pass every `interval` until `shutdown` flips to `true`
    ///
    /// The site list is snapshotted at the start of every pass.
    pub async fn watch(
        &self,
        sites: &SiteList,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut passes = 0;

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }

            let summary = self.run_pass(&sites.snapshot()).await;
            passes += 1;
            info!(
                "Pass {} done: {} alert(s), {} probe failure(s), next in {:?}",
                passes,
                summary.alerts.len(),
                summary.api_failures.len(),
                interval
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Watch stopped after {} pass(es)", passes);
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MockSink;
    use crate::config::ProbeConfig;
    use crate::probe::{ConnectScript, ScriptedConnector};

    const END: &str = r#"{"type":"TaskEnd"}"#;

    fn config() -> Config {
        Config {
            probe: ProbeConfig {
                username: "user".to_string(),
                token: "secret".to_string(),
                ..ProbeConfig::default()
            },
            ..Config::default()
        }
    }

    fn node(status: u16, region: &str) -> String {
        format!(
            r#"{{"type":"NewData","data":{{"HttpCode":{},"Loss":0,"isp_name":"电信","province_name":"{}"}}}}"#,
            status, region
        )
    }

    /// Completed session with `failed` nodes failing in `region` and the
    /// rest of `total` healthy
    fn batch(total: usize, failed: usize, region: &str) -> ConnectScript {
        let mut frames: Vec<String> = (0..failed).map(|_| node(502, region)).collect();
        frames.extend((failed..total).map(|_| node(200, "上海")));
        frames.push(END.to_string());
        ConnectScript::frames(frames)
    }

    fn refused() -> ConnectScript {
        ConnectScript::Refuse("refused".to_string())
    }

    fn monitor(scripts: Vec<ConnectScript>, sink: MockSink) -> Monitor {
        Monitor::new(
            &config(),
            Arc::new(ScriptedConnector::new(scripts)),
            Arc::new(sink),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_classifies_every_site() {
        let sink = MockSink::new();
        let monitor = monitor(
            vec![
                batch(10, 3, "Beijing"),
                batch(10, 0, "北京"),
                refused(),
                refused(),
                refused(),
                ConnectScript::frames([END]),
            ],
            sink.clone(),
        );
        let sites = vec![
            Site::from_url("down.example.com"),
            Site::from_url("up.example.com"),
            Site::from_url("broken.example.com"),
            Site::new("no-url", ""),
            Site::from_url("empty.example.com"),
        ];

        let summary = monitor.run_pass(&sites).await;

        assert_eq!(summary.alerts.len(), 1);
        assert_eq!(summary.alerts[0].site.name, "down.example.com");
        assert_eq!(summary.healthy, vec![sites[1].clone()]);
        assert_eq!(summary.api_failures, vec![sites[2].clone()]);
        assert_eq!(summary.skipped, vec![sites[3].clone()]);
        assert_eq!(summary.no_data, vec![sites[4].clone()]);
        assert_eq!(summary.probed(), 4);
        assert!(summary.delivered);

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("down.example.com"));
        assert!(messages[0].contains("server error 502: Beijing(3)"));
        assert!(!messages[0].contains("up.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_alerts_of_a_pass_share_one_message() {
        let sink = MockSink::new();
        let monitor = monitor(vec![batch(4, 4, "北京"), batch(4, 4, "上海")], sink.clone());
        let sites = vec![Site::from_url("a.com"), Site::from_url("b.com")];

        let summary = monitor.run_pass(&sites).await;

        assert_eq!(summary.alerts.len(), 2);
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].matches("Site failure alert").count(), 2);
        assert!(messages[0].contains("\n\n<b>⚠️ Site failure alert</b>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_pass_sends_nothing() {
        let sink = MockSink::new();
        let monitor = monitor(vec![batch(5, 0, "北京")], sink.clone());

        let summary = monitor.run_pass(&[Site::from_url("a.com")]).await;

        assert!(summary.alerts.is_empty());
        assert!(!summary.delivered);
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_abort_pass() {
        let monitor = monitor(
            vec![batch(2, 2, "北京"), batch(2, 2, "上海")],
            MockSink::failing("chat not found"),
        );
        let sites = vec![Site::from_url("a.com"), Site::from_url("b.com")];

        let summary = monitor.run_pass(&sites).await;

        assert_eq!(summary.alerts.len(), 2);
        assert!(!summary.delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_all_grades_sites() {
        let monitor = Arc::new(monitor(
            vec![
                batch(10, 0, "北京"),
                batch(10, 1, "北京"),
                batch(10, 5, "北京"),
                refused(),
                refused(),
                refused(),
            ],
            MockSink::new(),
        ));
        let sites: Vec<Site> = ["a.com", "b.com", "c.com", "d.com"]
            .iter()
            .map(|url| Site::from_url(url))
            .collect();

        let report = monitor.check_all(sites, Duration::from_secs(180)).await;

        assert!(!report.timed_out);
        assert_eq!(report.total_sites, 4);
        let statuses: Vec<HealthStatus> = report.entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                HealthStatus::Normal,
                HealthStatus::Warning,
                HealthStatus::Abnormal,
                HealthStatus::ApiFailure
            ]
        );
        assert_eq!(report.entries[2].fail_rate, Some(0.5));
        assert_eq!(report.entries[2].top_regions, vec![("北京".to_string(), 5)]);
        assert_eq!(report.entries[3].fail_rate, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_all_stops_at_deadline() {
        // Second site never answers: three 60 s sessions plus pauses
        let connector = Arc::new(ScriptedConnector::new(vec![
            batch(10, 0, "北京"),
            ConnectScript::frames(Vec::<String>::new()),
            ConnectScript::frames(Vec::<String>::new()),
            ConnectScript::frames(Vec::<String>::new()),
            batch(10, 0, "北京"),
        ]));
        let stats = connector.stats();
        let monitor = Arc::new(Monitor::new(
            &config(),
            connector,
            Arc::new(MockSink::new()),
        ));
        let sites: Vec<Site> = ["a.com", "b.com", "c.com"]
            .iter()
            .map(|url| Site::from_url(url))
            .collect();

        let started = tokio::time::Instant::now();
        let report = monitor.check_all(sites, Duration::from_secs(100)).await;

        // b.com started before the deadline and ran all its attempts
        assert!(report.timed_out);
        assert_eq!(started.elapsed(), Duration::from_secs(190));
        assert_eq!(report.total_sites, 3);
        let names: Vec<&str> = report.entries.iter().map(|e| e.site.name.as_str()).collect();
        assert_eq!(names, vec!["a.com", "b.com"]);
        assert_eq!(report.entries[1].status, HealthStatus::ApiFailure);

        // Every opened transport was released and c.com was never probed
        assert_eq!(stats.connects(), 4);
        assert_eq!(stats.closes(), stats.connects());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_all_deadline_already_passed() {
        let monitor = Arc::new(monitor(vec![batch(10, 0, "北京")], MockSink::new()));

        let report = monitor
            .check_all(vec![Site::from_url("a.com")], Duration::ZERO)
            .await;

        assert!(report.timed_out);
        assert!(report.entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_url_lists_more_regions() {
        let regions = ["a", "b", "c", "d", "e"];
        let mut frames: Vec<String> = regions.iter().map(|r| node(404, r)).collect();
        frames.push(END.to_string());
        let monitor = monitor(vec![ConnectScript::frames(frames)], MockSink::new());

        let entry = monitor.check_url("www.example.com").await;

        assert_eq!(entry.site.url, "https://www.example.com");
        assert_eq!(entry.status, HealthStatus::Abnormal);
        assert_eq!(entry.top_regions.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_usable_data_is_graded_separately() {
        let monitor = monitor(vec![ConnectScript::frames([END])], MockSink::new());
        let entry = monitor.check_url("example.com").await;
        assert_eq!(entry.status, HealthStatus::NoData);
        assert!(entry.top_regions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_runs_until_shutdown() {
        let sink = MockSink::new();
        let monitor = Arc::new(monitor(
            vec![batch(2, 0, "北京"), batch(2, 0, "北京"), batch(2, 0, "北京")],
            sink.clone(),
        ));
        let sites = Arc::new(SiteList::new(vec![Site::from_url("a.com")]));
        let (tx, rx) = watch::channel(false);

        let handle = {
            let monitor = Arc::clone(&monitor);
            let sites = Arc::clone(&sites);
            tokio::spawn(async move { monitor.watch(&sites, Duration::from_secs(60), rx).await })
        };

        // Passes start at 0 s and 60 s
        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_honours_early_shutdown() {
        let monitor = monitor(vec![], MockSink::new());
        let sites = SiteList::new(vec![Site::from_url("a.com")]);
        let (_tx, rx) = watch::channel(true);

        assert_eq!(monitor.watch(&sites, Duration::from_secs(60), rx).await, 0);
    }
}

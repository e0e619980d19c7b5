//! Broker management facade
//!
//! Turns administrative intents into admin client calls. Every create and
//! delete checks existence first; the check is best-effort and can race
//! with other callers, in which case the broker's own answer wins.

use sbgate_broker::{
    AdminClient, BrokerError, QueueOptions, RuleOptions, SqlFilter, SubscriptionOptions,
    TopicOptions,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::outcome::{Existence, Outcome};
use crate::retry::RetryPolicy;

pub const DEFAULT_PAGE_SIZE: usize = 100;

pub struct ManagementFacade {
    admin: Arc<dyn AdminClient>,
    retry: RetryPolicy,
    page_size: usize,
}

/// Outcome for an existence check that could not complete
fn check_failed(message: String) -> Outcome {
    Outcome::TransportError(message)
}

fn log_failure(operation: &str, target: &str, outcome: &Outcome) {
    if let Outcome::TransportError(message) = outcome {
        info!(operation, target, error = %message, "Broker operation failed");
    }
}

impl ManagementFacade {
    pub fn new(admin: Arc<dyn AdminClient>, retry: RetryPolicy, page_size: usize) -> Self {
        Self {
            admin,
            retry,
            page_size: page_size.max(1),
        }
    }

    pub async fn queue_exists(&self, name: &str) -> Existence {
        let admin = &self.admin;
        Existence::from_check(self.retry.run("queue_exists", move || admin.queue_exists(name)).await)
    }

    pub async fn topic_exists(&self, name: &str) -> Existence {
        let admin = &self.admin;
        Existence::from_check(self.retry.run("topic_exists", move || admin.topic_exists(name)).await)
    }

    pub async fn subscription_exists(&self, topic: &str, subscription: &str) -> Existence {
        let admin = &self.admin;
        Existence::from_check(
            self.retry
                .run("subscription_exists", move || {
                    admin.subscription_exists(topic, subscription)
                })
                .await,
        )
    }

    pub async fn create_queue(&self, options: &QueueOptions) -> Outcome {
        match self.queue_exists(&options.name).await {
            Existence::Exists => return Outcome::AlreadyExists,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Absent => {}
        }

        let admin = &self.admin;
        let outcome: Outcome = self
            .retry
            .run_at_most_once("create_queue", move || admin.create_queue(options))
            .await
            .into();
        log_failure("create_queue", &options.name, &outcome);
        outcome
    }

    pub async fn create_topic(&self, options: &TopicOptions) -> Outcome {
        match self.topic_exists(&options.name).await {
            Existence::Exists => return Outcome::AlreadyExists,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Absent => {}
        }

        let admin = &self.admin;
        let outcome: Outcome = self
            .retry
            .run_at_most_once("create_topic", move || admin.create_topic(options))
            .await
            .into();
        log_failure("create_topic", &options.name, &outcome);
        outcome
    }

    /// Create a subscription, attaching `rule` when one is given
    ///
    /// If the rule cannot be attached the subscription is deleted again so
    /// the caller never sees a half-configured subscription.
    pub async fn create_subscription(
        &self,
        options: &SubscriptionOptions,
        rule: Option<&RuleOptions>,
    ) -> Outcome {
        // A filter that cannot parse never reaches the broker
        if let Some(rule) = rule {
            if let Err(e) = SqlFilter::parse(&rule.filter) {
                info!(subscription = %options.name, rule = %rule.name, error = %e, "Rule rejected");
                return Outcome::RuleRejected(e.to_string());
            }
        }

        match self.topic_exists(&options.topic).await {
            Existence::Absent => return Outcome::ParentMissing,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Exists => {}
        }
        match self.subscription_exists(&options.topic, &options.name).await {
            Existence::Exists => return Outcome::AlreadyExists,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Absent => {}
        }

        let admin = &self.admin;
        let created = self
            .retry
            .run_at_most_once("create_subscription", move || admin.create_subscription(options))
            .await;
        match created {
            Ok(()) => {}
            // Topic vanished between the check and the create
            Err(BrokerError::NotFound(_)) => return Outcome::ParentMissing,
            Err(e) => {
                let outcome = Outcome::from_broker_error(&e);
                log_failure("create_subscription", &options.name, &outcome);
                return outcome;
            }
        }

        let Some(rule) = rule else {
            return Outcome::Success;
        };

        let attached = self
            .retry
            .run_at_most_once("create_rule", move || {
                admin.create_rule(&options.topic, &options.name, rule)
            })
            .await;
        let Err(e) = attached else {
            return Outcome::Success;
        };

        warn!(
            topic = %options.topic,
            subscription = %options.name,
            rule = %rule.name,
            error = %e,
            "Rule rejected, removing subscription"
        );
        if let Err(rollback) = self
            .retry
            .run("delete_subscription", move || {
                admin.delete_subscription(&options.topic, &options.name)
            })
            .await
        {
            warn!(
                topic = %options.topic,
                subscription = %options.name,
                error = %rollback,
                "Failed to remove subscription after rule rejection"
            );
        }
        Outcome::RuleRejected(e.to_string())
    }

    pub async fn delete_queue(&self, name: &str) -> Outcome {
        match self.queue_exists(name).await {
            Existence::Absent => return Outcome::NotFound,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Exists => {}
        }

        let admin = &self.admin;
        let outcome: Outcome = self
            .retry
            .run("delete_queue", move || admin.delete_queue(name))
            .await
            .into();
        log_failure("delete_queue", name, &outcome);
        outcome
    }

    pub async fn delete_topic(&self, name: &str) -> Outcome {
        match self.topic_exists(name).await {
            Existence::Absent => return Outcome::NotFound,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Exists => {}
        }

        let admin = &self.admin;
        let outcome: Outcome = self
            .retry
            .run("delete_topic", move || admin.delete_topic(name))
            .await
            .into();
        log_failure("delete_topic", name, &outcome);
        outcome
    }

    pub async fn delete_subscription(&self, topic: &str, subscription: &str) -> Outcome {
        match self.subscription_exists(topic, subscription).await {
            Existence::Absent => return Outcome::NotFound,
            Existence::CheckFailed(message) => return check_failed(message),
            Existence::Exists => {}
        }

        let admin = &self.admin;
        let outcome: Outcome = self
            .retry
            .run("delete_subscription", move || {
                admin.delete_subscription(topic, subscription)
            })
            .await
            .into();
        log_failure("delete_subscription", subscription, &outcome);
        outcome
    }

    /// Every queue name, fetched page by page
    pub async fn list_queue_names(&self) -> Result<Vec<String>, BrokerError> {
        let admin = &self.admin;
        self.collect_pages("list_queues", move |skip, top| admin.list_queues(skip, top))
            .await
    }

    /// Every topic name, fetched page by page
    pub async fn list_topic_names(&self) -> Result<Vec<String>, BrokerError> {
        let admin = &self.admin;
        self.collect_pages("list_topics", move |skip, top| admin.list_topics(skip, top))
            .await
    }

    async fn collect_pages<F, Fut>(&self, operation: &str, fetch: F) -> Result<Vec<String>, BrokerError>
    where
        F: Fn(usize, usize) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<String>, BrokerError>>,
    {
        let mut names = Vec::new();
        loop {
            let skip = names.len();
            let page = self
                .retry
                .run(operation, || fetch(skip, self.page_size))
                .await
                .map_err(|e| {
                    info!(operation, error = %e, "Listing failed");
                    e
                })?;
            let fetched = page.len();
            names.extend(page);
            if fetched < self.page_size {
                return Ok(names);
            }
        }
    }
}

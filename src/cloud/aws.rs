//! AWS implementation of the platform traits.
//!
//! CloudFormation backs [`StackApi`], ECS backs [`ServiceApi`], SQS backs
//! [`QueueApi`], S3 backs [`ObjectStoreApi`], EventBridge backs
//! [`ScheduleApi`], Cost Explorer backs [`CostApi`] and CloudWatch Logs backs
//! [`LogApi`]. SDK errors are classified centrally by [`classify`].

use async_trait::async_trait;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info};

use crate::error::{CloudError, OrchestratorError, PermissionError, Result};

use super::api::{CostApi, LogApi, ObjectStoreApi, QueueApi, ScheduleApi, ServiceApi, StackApi};
use super::types::{
    LogEvent, QueueDepth, QueueJob, ScheduleRule, ServiceCost, ServiceState, StackDescription,
    StackRequest, StoredObject, TemplateSource, TemplateValidation, UpdateOutcome,
};

/// Cost Explorer is only served from this region.
const COST_EXPLORER_REGION: &str = "us-east-1";

/// Upper bound on `FilterLogEvents` pages read per call.
const MAX_LOG_PAGES: usize = 50;

/// ECS attachment detail holding a task's private address.
const PRIVATE_IP_DETAIL: &str = "privateIPv4Address";

/// Error codes meaning the caller is not allowed to perform the action.
const PERMISSION_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
    "UnauthorizedException",
    "AuthorizationError",
];

/// Error codes meaning the API throttled the caller.
const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

/// Clients for every service the orchestrator touches.
#[derive(Debug, Clone)]
pub struct AwsCloud {
    region: String,
    cloudformation: aws_sdk_cloudformation::Client,
    ecs: aws_sdk_ecs::Client,
    sqs: aws_sdk_sqs::Client,
    s3: aws_sdk_s3::Client,
    eventbridge: aws_sdk_eventbridge::Client,
    costexplorer: aws_sdk_costexplorer::Client,
    logs: aws_sdk_cloudwatchlogs::Client,
}

impl AwsCloud {
    /// Loads credentials from the environment and builds clients for `region`.
    pub async fn connect(region: &str) -> Self {
        info!("Connecting to AWS in {region}");

        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let costexplorer_config = aws_sdk_costexplorer::config::Builder::from(&config)
            .region(aws_config::Region::new(COST_EXPLORER_REGION))
            .build();

        Self {
            region: region.to_string(),
            cloudformation: aws_sdk_cloudformation::Client::new(&config),
            ecs: aws_sdk_ecs::Client::new(&config),
            sqs: aws_sdk_sqs::Client::new(&config),
            s3: aws_sdk_s3::Client::new(&config),
            eventbridge: aws_sdk_eventbridge::Client::new(&config),
            costexplorer: aws_sdk_costexplorer::Client::from_conf(costexplorer_config),
            logs: aws_sdk_cloudwatchlogs::Client::new(&config),
        }
    }

    /// Region the clients are bound to.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Maps an SDK error onto the crate taxonomy.
fn classify<E, R>(
    err: SdkError<E, R>,
    service: &str,
    operation: &str,
    resource: &str,
) -> OrchestratorError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.as_service_error().and_then(ProvideErrorMetadata::code).map(str::to_string);
    let message = err
        .as_service_error()
        .and_then(ProvideErrorMetadata::message)
        .map(str::to_string);

    if matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)) {
        return CloudError::Network {
            service: service.to_string(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            message: DisplayErrorContext(&err).to_string(),
        }
        .into();
    }

    match code.as_deref() {
        Some(c) if PERMISSION_CODES.contains(&c) => PermissionError {
            action: format!("{service}:{operation}"),
            resource: resource.to_string(),
            message: message.unwrap_or_else(|| c.to_string()),
        }
        .into(),
        Some(c) if THROTTLING_CODES.contains(&c) => CloudError::Throttled {
            service: service.to_string(),
            operation: operation.to_string(),
            resource: resource.to_string(),
        }
        .into(),
        _ => CloudError::ApiFailed {
            service: service.to_string(),
            operation: operation.to_string(),
            resource: resource.to_string(),
            code: code.unwrap_or_else(|| String::from("Unknown")),
            message: message.unwrap_or_else(|| DisplayErrorContext(&err).to_string()),
        }
        .into(),
    }
}

fn service_message<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(ProvideErrorMetadata::message)
}

fn build_error(service: &str, message: impl std::fmt::Display) -> OrchestratorError {
    CloudError::invalid_response(service, format!("failed to build request: {message}")).into()
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn stack_inputs(
    request: &StackRequest,
) -> (
    Vec<aws_sdk_cloudformation::types::Parameter>,
    Vec<aws_sdk_cloudformation::types::Tag>,
    Vec<aws_sdk_cloudformation::types::Capability>,
) {
    use aws_sdk_cloudformation::types::{Capability, Parameter, Tag};

    let parameters = request
        .parameters
        .iter()
        .map(|(k, v)| Parameter::builder().parameter_key(k).parameter_value(v).build())
        .collect();

    let tags = request
        .tags
        .iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect();

    let capabilities = request
        .capabilities
        .iter()
        .map(|c| Capability::from(c.as_str()))
        .collect();

    (parameters, tags, capabilities)
}

#[async_trait]
impl StackApi for AwsCloud {
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>> {
        debug!("DescribeStacks {stack_name}");

        let output = match self
            .cloudformation
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if service_message(&e).is_some_and(|m| m.contains("does not exist")) => {
                return Ok(None);
            }
            Err(e) => return Err(classify(e, "cloudformation", "DescribeStacks", stack_name)),
        };

        let Some(stack) = output.stacks().first() else {
            return Ok(None);
        };

        let outputs = stack
            .outputs()
            .iter()
            .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
            .collect();

        let parameters = stack
            .parameters()
            .iter()
            .filter_map(|p| {
                Some((
                    p.parameter_key()?.to_string(),
                    p.parameter_value().unwrap_or_default().to_string(),
                ))
            })
            .collect();

        let tags: BTreeMap<String, String> = stack
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
            .collect();

        Ok(Some(StackDescription {
            name: stack.stack_name().unwrap_or(stack_name).to_string(),
            raw_status: stack
                .stack_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            reason: stack.stack_status_reason().map(str::to_string),
            outputs,
            parameters,
            tags,
        }))
    }

    async fn validate_template(&self, template: &TemplateSource) -> Result<TemplateValidation> {
        let call = self.cloudformation.validate_template();
        let (call, resource) = match template {
            TemplateSource::Body(body) => (call.template_body(body), String::from("<inline template>")),
            TemplateSource::Url(url) => (call.template_url(url), url.clone()),
        };

        let output = call
            .send()
            .await
            .map_err(|e| classify(e, "cloudformation", "ValidateTemplate", &resource))?;

        Ok(TemplateValidation {
            parameters: output
                .parameters()
                .iter()
                .filter_map(|p| p.parameter_key().map(str::to_string))
                .collect(),
            capabilities: output
                .capabilities()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            description: output.description().map(str::to_string),
        })
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String> {
        info!("CreateStack {}", request.stack_name);
        let (parameters, tags, capabilities) = stack_inputs(request);

        let call = self
            .cloudformation
            .create_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters))
            .set_tags(Some(tags))
            .set_capabilities(Some(capabilities));

        let call = match &request.template {
            TemplateSource::Body(body) => call.template_body(body),
            TemplateSource::Url(url) => call.template_url(url),
        };

        let output = call
            .send()
            .await
            .map_err(|e| classify(e, "cloudformation", "CreateStack", &request.stack_name))?;

        Ok(output.stack_id().unwrap_or(&request.stack_name).to_string())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateOutcome> {
        info!("UpdateStack {}", request.stack_name);
        let (parameters, tags, capabilities) = stack_inputs(request);

        let call = self
            .cloudformation
            .update_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters))
            .set_tags(Some(tags))
            .set_capabilities(Some(capabilities));

        let call = match &request.template {
            TemplateSource::Body(body) => call.template_body(body),
            TemplateSource::Url(url) => call.template_url(url),
        };

        match call.send().await {
            Ok(output) => Ok(UpdateOutcome::Started(
                output.stack_id().unwrap_or(&request.stack_name).to_string(),
            )),
            Err(e) if service_message(&e).is_some_and(|m| m.contains("No updates are to be performed")) => {
                Ok(UpdateOutcome::NoChanges)
            }
            Err(e) => Err(classify(e, "cloudformation", "UpdateStack", &request.stack_name)),
        }
    }
}

#[async_trait]
impl ServiceApi for AwsCloud {
    async fn describe_service(&self, cluster: &str, service: &str) -> Result<Option<ServiceState>> {
        let resource = format!("{cluster}/{service}");
        debug!("DescribeServices {resource}");

        let output = self
            .ecs
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(|e| classify(e, "ecs", "DescribeServices", &resource))?;

        let Some(svc) = output
            .services()
            .iter()
            .find(|s| s.status() != Some("INACTIVE"))
        else {
            return Ok(None);
        };

        let count = |n: i32| u32::try_from(n).unwrap_or(0);

        Ok(Some(ServiceState {
            desired_count: count(svc.desired_count()),
            running_count: count(svc.running_count()),
            pending_count: count(svc.pending_count()),
        }))
    }

    async fn set_desired_count(&self, cluster: &str, service: &str, count: u32) -> Result<()> {
        let resource = format!("{cluster}/{service}");
        info!("UpdateService {resource} desiredCount={count}");

        let desired = i32::try_from(count)
            .map_err(|_| CloudError::invalid_response("ecs", format!("desired count {count} too large")))?;

        self.ecs
            .update_service()
            .cluster(cluster)
            .service(service)
            .desired_count(desired)
            .send()
            .await
            .map_err(|e| classify(e, "ecs", "UpdateService", &resource))?;

        Ok(())
    }

    async fn list_task_addresses(&self, cluster: &str, service: &str) -> Result<Vec<String>> {
        let resource = format!("{cluster}/{service}");

        let tasks = self
            .ecs
            .list_tasks()
            .cluster(cluster)
            .service_name(service)
            .desired_status(aws_sdk_ecs::types::DesiredStatus::Running)
            .send()
            .await
            .map_err(|e| classify(e, "ecs", "ListTasks", &resource))?;

        let arns = tasks.task_arns().to_vec();
        if arns.is_empty() {
            return Ok(Vec::new());
        }

        let described = self
            .ecs
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(arns))
            .send()
            .await
            .map_err(|e| classify(e, "ecs", "DescribeTasks", &resource))?;

        let addresses = described
            .tasks()
            .iter()
            .flat_map(|t| t.attachments().iter())
            .flat_map(|a| a.details().iter())
            .filter(|d| d.name() == Some(PRIVATE_IP_DETAIL))
            .filter_map(|d| d.value().map(str::to_string))
            .collect();

        Ok(addresses)
    }
}

#[async_trait]
impl QueueApi for AwsCloud {
    async fn send_job(&self, queue_url: &str, job: &QueueJob) -> Result<String> {
        use aws_sdk_sqs::types::MessageAttributeValue;

        let body = serde_json::to_string(job)
            .map_err(|e| CloudError::invalid_response("sqs", format!("job encoding failed: {e}")))?;

        let attribute = |data_type: &str, value: String| {
            MessageAttributeValue::builder()
                .data_type(data_type)
                .string_value(value)
                .build()
                .map_err(|e| build_error("sqs", e))
        };

        let output = self
            .sqs
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .message_attributes("Priority", attribute("Number", job.priority.to_string())?)
            .message_attributes("Language", attribute("String", job.language.clone())?)
            .message_attributes("TestType", attribute("String", job.test_type.clone())?)
            .send()
            .await
            .map_err(|e| classify(e, "sqs", "SendMessage", queue_url))?;

        let message_id = output.message_id().unwrap_or_default().to_string();
        info!("Enqueued job {} as message {message_id}", job.id);
        Ok(message_id)
    }

    async fn queue_depth(&self, queue_url: &str) -> Result<QueueDepth> {
        use aws_sdk_sqs::types::QueueAttributeName;

        let output = self
            .sqs
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesDelayed)
            .send()
            .await
            .map_err(|e| classify(e, "sqs", "GetQueueAttributes", queue_url))?;

        let read = |name: QueueAttributeName| {
            output
                .attributes()
                .and_then(|attrs| attrs.get(&name))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Ok(QueueDepth {
            visible: read(QueueAttributeName::ApproximateNumberOfMessages),
            in_flight: read(QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
            delayed: read(QueueAttributeName::ApproximateNumberOfMessagesDelayed),
        })
    }
}

#[async_trait]
impl ObjectStoreApi for AwsCloud {
    async fn list_objects_since(
        &self,
        bucket: &str,
        prefix: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredObject>> {
        let resource = format!("s3://{bucket}/{prefix}");
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .s3
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| classify(e, "s3", "ListObjectsV2", &resource))?;

            for object in output.contents() {
                let (Some(key), Some(modified)) =
                    (object.key(), object.last_modified().and_then(to_chrono))
                else {
                    continue;
                };
                if modified > since {
                    objects.push(StoredObject {
                        key: key.to_string(),
                        last_modified: modified,
                    });
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        debug!("{} new objects under {resource}", objects.len());
        Ok(objects)
    }
}

#[async_trait]
impl ScheduleApi for AwsCloud {
    async fn list_rules(&self, prefix: &str) -> Result<Vec<ScheduleRule>> {
        use aws_sdk_eventbridge::types::RuleState;

        let mut rules = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .eventbridge
                .list_rules()
                .name_prefix(prefix)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify(e, "eventbridge", "ListRules", prefix))?;

            rules.extend(output.rules().iter().filter_map(|r| {
                Some(ScheduleRule {
                    name: r.name()?.to_string(),
                    enabled: r.state() == Some(&RuleState::Enabled),
                    schedule: r.schedule_expression().map(str::to_string),
                })
            }));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(rules)
    }
}

#[async_trait]
impl CostApi for AwsCloud {
    async fn cost_by_service(
        &self,
        tags: &BTreeMap<String, String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ServiceCost>> {
        use aws_sdk_costexplorer::types::{
            DateInterval, Expression, Granularity, GroupDefinition, GroupDefinitionType, TagValues,
        };

        let resource = tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let period = DateInterval::builder()
            .start(start.format("%Y-%m-%d").to_string())
            .end(end.format("%Y-%m-%d").to_string())
            .build()
            .map_err(|e| build_error("costexplorer", e))?;

        let mut tag_filters: Vec<Expression> = tags
            .iter()
            .map(|(k, v)| {
                Expression::builder()
                    .tags(TagValues::builder().key(k).values(v).build())
                    .build()
            })
            .collect();

        let filter = if tag_filters.len() > 1 {
            Some(Expression::builder().set_and(Some(tag_filters)).build())
        } else {
            tag_filters.pop()
        };

        let output = self
            .costexplorer
            .get_cost_and_usage()
            .time_period(period)
            .granularity(Granularity::Monthly)
            .metrics("UnblendedCost")
            .group_by(
                GroupDefinition::builder()
                    .r#type(GroupDefinitionType::Dimension)
                    .key("SERVICE")
                    .build(),
            )
            .set_filter(filter)
            .send()
            .await
            .map_err(|e| classify(e, "costexplorer", "GetCostAndUsage", &resource))?;

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for group in output.results_by_time().iter().flat_map(|r| r.groups().iter()) {
            let Some(service) = group.keys().first() else {
                continue;
            };
            let amount = group
                .metrics()
                .and_then(|m| m.get("UnblendedCost"))
                .and_then(|v| v.amount())
                .and_then(|a| a.parse::<f64>().ok())
                .unwrap_or(0.0);
            *totals.entry(service.clone()).or_insert(0.0) += amount;
        }

        Ok(totals
            .into_iter()
            .map(|(service, amount_usd)| ServiceCost { service, amount_usd })
            .collect())
    }
}

#[async_trait]
impl LogApi for AwsCloud {
    async fn recent_events(
        &self,
        group: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LogEvent>> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut events = VecDeque::new();
        let mut next_token: Option<String> = None;

        for page in 1..=MAX_LOG_PAGES {
            let output = self
                .logs
                .filter_log_events()
                .log_group_name(group)
                .start_time(since.timestamp_millis())
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(|e| classify(e, "logs", "FilterLogEvents", group))?;

            let page_events = output.events().iter().filter_map(|e| {
                Some(LogEvent {
                    timestamp: DateTime::<Utc>::from_timestamp_millis(e.timestamp()?)?,
                    stream: e.log_stream_name().map(str::to_string),
                    message: e.message().unwrap_or_default().trim_end().to_string(),
                })
            });
            keep_latest(&mut events, page_events, limit);

            match output.next_token() {
                Some(token) if next_token.as_deref() != Some(token) => {
                    next_token = Some(token.to_string());
                }
                _ => break,
            }
            if page == MAX_LOG_PAGES {
                debug!("Stopped reading {group} after {MAX_LOG_PAGES} pages");
            }
        }

        let mut events: Vec<LogEvent> = events.into();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

/// Appends `incoming`, dropping the oldest entries beyond `limit`.
fn keep_latest(
    events: &mut VecDeque<LogEvent>,
    incoming: impl IntoIterator<Item = LogEvent>,
    limit: usize,
) {
    for event in incoming {
        if events.len() == limit {
            events.pop_front();
        }
        if limit > 0 {
            events.push_back(event);
        }
    }
}

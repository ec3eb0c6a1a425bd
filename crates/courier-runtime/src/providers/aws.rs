//! SQS/SNS broker speaking the AWS query protocol over HTTP.
//!
//! Requests are form-encoded `POST`s signed with AWS Signature Version 4 and
//! responses are XML. Calls go straight to the service endpoints, which keeps
//! the provider light and lets it target LocalStack or any other compatible
//! endpoint through `aws.endpoint_url`.
//!
//! ## Authentication
//!
//! Credentials come from `aws.access_key_id` / `aws.secret_access_key`, or
//! from the `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` environment
//! variables when the configuration has none. Without credentials every call
//! fails with [`BrokerError::Authentication`].
//!
//! ## Topic subscriptions
//!
//! Subscribing a queue resolves the queue ARN, subscribes it with protocol
//! `sqs` and sets a queue policy allowing the account's topics to deliver to
//! it. Deliveries arrive in the notification shape, with the published body in
//! its `Message` field.
//!
//! ## Example
//!
//! ```no_run
//! use courier_runtime::providers::AwsBroker;
//! use courier_runtime::AwsSettings;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = AwsSettings {
//!     region: "us-east-1".to_string(),
//!     endpoint_url: Some("http://localhost:4566".to_string()),
//!     access_key_id: Some("test".to_string()),
//!     secret_access_key: Some("test".to_string()),
//! };
//!
//! let broker = AwsBroker::new(&settings)?;
//! # Ok(())
//! # }
//! ```

use crate::broker::{
    Broker, BrokerMessage, ProviderType, PublishResponse, QueueAttributes, ATTRIBUTE_POLICY,
};
use crate::config::{AwsSettings, MAX_WAIT_TIME_SECONDS};
use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

/// Query API version for SQS
pub const SQS_API_VERSION: &str = "2012-11-05";

/// Query API version for SNS
pub const SNS_API_VERSION: &str = "2010-03-31";

/// Largest message body SQS accepts
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// The two services the provider talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Sqs,
    Sns,
}

impl Service {
    fn signing_name(&self) -> &'static str {
        match self {
            Self::Sqs => "sqs",
            Self::Sns => "sns",
        }
    }

    fn api_version(&self) -> &'static str {
        match self {
            Self::Sqs => SQS_API_VERSION,
            Self::Sns => SNS_API_VERSION,
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    region: String,
}

impl AwsV4Signer {
    fn new(access_key: String, secret_key: String, region: String) -> Self {
        Self {
            access_key,
            secret_key,
            region,
        }
    }

    /// Sign a request and return the headers to add to it
    ///
    /// Produces `Authorization`, `x-amz-date` and `host`.
    #[allow(clippy::too_many_arguments)]
    fn sign_request(
        &self,
        service: &str,
        method: &str,
        host: &str,
        path: &str,
        query_params: &HashMap<String, String>,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<HashMap<String, String>, BrokerError> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_query_string = canonical_query(query_params);

        // Canonical headers (must be sorted)
        let canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let signed_headers = "host;x-amz-date";

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(service, &string_to_sign, &date_stamp)?;

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization_header);
        headers.insert("x-amz-date".to_string(), amz_date);
        headers.insert("host".to_string(), host.to_string());

        Ok(headers)
    }

    /// Derive the signing key and sign the string to sign
    ///
    /// kSecret = "AWS4" + secret, then HMAC over date, region, service and
    /// "aws4_request" in turn.
    fn calculate_signature(
        &self,
        service: &str,
        string_to_sign: &str,
        date_stamp: &str,
    ) -> Result<String, BrokerError> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, service.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes())?;

        Ok(hex::encode(signature))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BrokerError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| BrokerError::Authentication(format!("Invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn canonical_query(params: &HashMap<String, String>) -> String {
    let mut pairs = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs.join("&")
}

/// Form-encode request parameters in order
fn form_body(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// Endpoints
// ============================================================================

/// Service endpoint split into the URL requests go to and the signed host
#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    url: String,
    host: String,
}

impl Endpoint {
    fn parse(url: &str) -> Result<Self, BrokerError> {
        let url = url.trim().trim_end_matches('/');
        let without_scheme = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or_else(|| {
                BrokerError::Configuration(format!(
                    "Endpoint '{}' must start with http:// or https://",
                    url
                ))
            })?;

        let host = without_scheme.split('/').next().unwrap_or(without_scheme);
        if host.is_empty() {
            return Err(BrokerError::Configuration(format!(
                "Endpoint '{}' has no host",
                url
            )));
        }

        Ok(Self {
            url: url.to_string(),
            host: host.to_string(),
        })
    }

    fn for_service(
        service: Service,
        region: &str,
        override_url: Option<&str>,
    ) -> Result<Self, BrokerError> {
        match override_url {
            Some(url) => Self::parse(url),
            None => Self::parse(&format!(
                "https://{}.{}.amazonaws.com",
                service.signing_name(),
                region
            )),
        }
    }
}

// ============================================================================
// AWS Broker
// ============================================================================

/// Broker provider for SQS queues and SNS topics
///
/// Holds no per-queue state; callers cache URLs and ARNs. Safe to share
/// across tasks behind an `Arc`.
pub struct AwsBroker {
    http_client: HttpClient,
    signer: Option<AwsV4Signer>,
    region: String,
    sqs_endpoint: Endpoint,
    sns_endpoint: Endpoint,
}

impl AwsBroker {
    /// Create provider from settings
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if the region is empty or the
    /// endpoint override is not an http(s) URL.
    pub fn new(settings: &AwsSettings) -> Result<Self, BrokerError> {
        if settings.region.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "Region cannot be empty".to_string(),
            ));
        }

        let access_key = settings
            .access_key_id
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok());
        let secret_key = settings
            .secret_access_key
            .clone()
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok());

        let signer = match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Some(AwsV4Signer::new(
                access_key,
                secret_key,
                settings.region.clone(),
            )),
            _ => {
                warn!("No AWS credentials configured; broker calls will fail to authenticate");
                None
            }
        };

        let endpoint_override = settings.endpoint_url.as_deref();
        let sqs_endpoint =
            Endpoint::for_service(Service::Sqs, &settings.region, endpoint_override)?;
        let sns_endpoint =
            Endpoint::for_service(Service::Sns, &settings.region, endpoint_override)?;

        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(
                u64::from(MAX_WAIT_TIME_SECONDS) + 10,
            ))
            .build()
            .map_err(|e| BrokerError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer,
            region: settings.region.clone(),
            sqs_endpoint,
            sns_endpoint,
        })
    }

    fn endpoint(&self, service: Service) -> &Endpoint {
        match service {
            Service::Sqs => &self.sqs_endpoint,
            Service::Sns => &self.sns_endpoint,
        }
    }

    /// Send a signed request and return the raw status and body
    async fn send_request(
        &self,
        service: Service,
        action: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<(u16, String), BrokerError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| BrokerError::Authentication("No credentials configured".to_string()))?;

        params.insert(0, ("Action".to_string(), action.to_string()));
        params.push(("Version".to_string(), service.api_version().to_string()));
        let body = form_body(&params);

        let endpoint = self.endpoint(service);
        let headers = signer.sign_request(
            service.signing_name(),
            "POST",
            &endpoint.host,
            "/",
            &HashMap::new(),
            &body,
            &Utc::now(),
        )?;

        let mut request = self
            .http_client
            .post(format!("{}/", endpoint.url))
            .header("content-type", "application/x-www-form-urlencoded");
        for (key, value) in headers {
            request = request.header(&key, value);
        }

        debug!(service = service.signing_name(), action = action, "Sending broker request");

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                BrokerError::Network(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                BrokerError::Network(format!("Connection failed: {}", e))
            } else {
                BrokerError::Network(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status().as_u16();
        let response_body = response
            .text()
            .await
            .map_err(|e| BrokerError::Network(format!("Failed to read response body: {}", e)))?;

        Ok((status, response_body))
    }

    /// Send a signed request, turning non-2xx responses into errors
    async fn call(
        &self,
        service: Service,
        action: &str,
        params: Vec<(String, String)>,
    ) -> Result<String, BrokerError> {
        let (status, body) = self.send_request(service, action, params).await?;
        if !(200..300).contains(&status) {
            return Err(parse_error_response(&body, status));
        }
        Ok(body)
    }
}

impl fmt::Debug for AwsBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsBroker")
            .field("region", &self.region)
            .field("sqs_endpoint", &self.sqs_endpoint.url)
            .field("sns_endpoint", &self.sns_endpoint.url)
            .field("credentials", &self.signer.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn param(key: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (key.into(), value.into())
}

/// Queue policy letting every topic in the publishing account deliver
fn queue_policy(queue_arn: &str, topic_arn: &str) -> String {
    let source = match topic_arn.rsplit_once(':') {
        Some((account_prefix, _)) => format!("{}:*", account_prefix),
        None => topic_arn.to_string(),
    };

    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "AllowTopicDelivery",
            "Effect": "Allow",
            "Principal": { "Service": "sns.amazonaws.com" },
            "Action": "sqs:SendMessage",
            "Resource": queue_arn,
            "Condition": { "ArnLike": { "aws:SourceArn": source } }
        }]
    })
    .to_string()
}

#[async_trait]
impl Broker for AwsBroker {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<String, BrokerError> {
        let mut params = vec![
            param("QueueName", name),
            param("Attribute.1.Name", "VisibilityTimeout"),
            param(
                "Attribute.1.Value",
                attributes.visibility_timeout_seconds.to_string(),
            ),
            param("Attribute.2.Name", "MessageRetentionPeriod"),
            param(
                "Attribute.2.Value",
                attributes.message_retention_seconds.to_string(),
            ),
        ];
        if attributes.fifo {
            params.push(param("Attribute.3.Name", "FifoQueue"));
            params.push(param("Attribute.3.Value", "true"));
        }

        let response = self.call(Service::Sqs, "CreateQueue", params).await?;
        find_element_text(&response, "QueueUrl")?.ok_or_else(|| {
            BrokerError::MalformedResponse("QueueUrl not found in response".to_string())
        })
    }

    async fn get_queue_arn(&self, queue_url: &str) -> Result<String, BrokerError> {
        let params = vec![
            param("QueueUrl", queue_url),
            param("AttributeName.1", "QueueArn"),
        ];

        let response = self.call(Service::Sqs, "GetQueueAttributes", params).await?;
        parse_attributes(&response)?
            .remove("QueueArn")
            .ok_or_else(|| {
                BrokerError::MalformedResponse("QueueArn not found in response".to_string())
            })
    }

    async fn set_queue_attributes(
        &self,
        queue_url: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<(), BrokerError> {
        let mut names: Vec<&String> = attributes.keys().collect();
        names.sort();

        let mut params = vec![param("QueueUrl", queue_url)];
        for (index, name) in names.into_iter().enumerate() {
            let n = index + 1;
            params.push(param(format!("Attribute.{}.Name", n), name.as_str()));
            params.push(param(
                format!("Attribute.{}.Value", n),
                attributes[name].as_str(),
            ));
        }

        self.call(Service::Sqs, "SetQueueAttributes", params).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        group_id: Option<&str>,
    ) -> Result<String, BrokerError> {
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(BrokerError::MessageTooLarge {
                size: body.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        let mut params = vec![param("QueueUrl", queue_url), param("MessageBody", body)];
        if let Some(group_id) = group_id {
            params.push(param("MessageGroupId", group_id));
            params.push(param("MessageDeduplicationId", Uuid::new_v4().to_string()));
        }

        let response = self.call(Service::Sqs, "SendMessage", params).await?;
        find_element_text(&response, "MessageId")?.ok_or_else(|| {
            BrokerError::MalformedResponse("MessageId not found in response".to_string())
        })
    }

    async fn receive_message(
        &self,
        queue_url: &str,
        wait_time_seconds: u32,
    ) -> Result<Option<BrokerMessage>, BrokerError> {
        let params = vec![
            param("QueueUrl", queue_url),
            param("MaxNumberOfMessages", "1"),
            param(
                "WaitTimeSeconds",
                wait_time_seconds.min(MAX_WAIT_TIME_SECONDS).to_string(),
            ),
            param("AttributeName.1", "ApproximateReceiveCount"),
            param("AttributeName.2", "MessageGroupId"),
        ];

        let response = self.call(Service::Sqs, "ReceiveMessage", params).await?;
        parse_receive_message_response(&response)
    }

    async fn delete_message(
        &self,
        queue_url: &str,
        receipt_handle: &str,
    ) -> Result<(), BrokerError> {
        let params = vec![
            param("QueueUrl", queue_url),
            param("ReceiptHandle", receipt_handle),
        ];

        self.call(Service::Sqs, "DeleteMessage", params).await?;
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        timeout_seconds: u32,
    ) -> Result<(), BrokerError> {
        let params = vec![
            param("QueueUrl", queue_url),
            param("ReceiptHandle", receipt_handle),
            param("VisibilityTimeout", timeout_seconds.to_string()),
        ];

        self.call(Service::Sqs, "ChangeMessageVisibility", params)
            .await?;
        Ok(())
    }

    async fn create_topic(&self, name: &str) -> Result<String, BrokerError> {
        let response = self
            .call(Service::Sns, "CreateTopic", vec![param("Name", name)])
            .await?;
        find_element_text(&response, "TopicArn")?.ok_or_else(|| {
            BrokerError::MalformedResponse("TopicArn not found in response".to_string())
        })
    }

    async fn subscribe_queue(
        &self,
        topic_arn: &str,
        queue_url: &str,
    ) -> Result<String, BrokerError> {
        let queue_arn = self.get_queue_arn(queue_url).await?;

        let params = vec![
            param("TopicArn", topic_arn),
            param("Protocol", "sqs"),
            param("Endpoint", queue_arn.as_str()),
        ];
        let response = self.call(Service::Sns, "Subscribe", params).await?;
        let subscription_arn = find_element_text(&response, "SubscriptionArn")?.ok_or_else(|| {
            BrokerError::MalformedResponse("SubscriptionArn not found in response".to_string())
        })?;

        let mut attributes = HashMap::new();
        attributes.insert(
            ATTRIBUTE_POLICY.to_string(),
            queue_policy(&queue_arn, topic_arn),
        );
        self.set_queue_attributes(queue_url, &attributes).await?;

        debug!(
            topic_arn = %topic_arn,
            queue_arn = %queue_arn,
            region = %self.region,
            "Subscribed queue to topic"
        );

        Ok(subscription_arn)
    }

    async fn publish(&self, topic_arn: &str, body: &str) -> Result<PublishResponse, BrokerError> {
        let params = vec![param("TopicArn", topic_arn), param("Message", body)];
        let (status_code, response) = self.send_request(Service::Sns, "Publish", params).await?;

        let message_id = find_element_text(&response, "MessageId").ok().flatten();
        let request_id = find_element_text(&response, "RequestId").ok().flatten();

        if !(200..300).contains(&status_code) {
            warn!(
                topic_arn = %topic_arn,
                status_code = status_code,
                error = %parse_error_response(&response, status_code),
                "Topic publish returned an error status"
            );
        }

        Ok(PublishResponse {
            status_code,
            message_id,
            request_id,
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Aws
    }
}

// ============================================================================
// XML Response Parsing
// ============================================================================

fn xml_error(e: impl fmt::Display) -> BrokerError {
    BrokerError::MalformedResponse(format!("XML parsing error: {}", e))
}

/// Text of the first element with the given name, `Some("")` if it is empty
fn find_element_text(xml: &str, element: &str) -> Result<Option<String>, BrokerError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == element.as_bytes() => {
                inside = true;
            }
            Ok(Event::Text(e)) if inside => {
                return e.unescape().map(|s| Some(s.into_owned())).map_err(xml_error);
            }
            Ok(Event::End(ref e)) if inside && e.name().as_ref() == element.as_bytes() => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == element.as_bytes() => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(None)
}

/// Name/value pairs of a GetQueueAttributes response
fn parse_attributes(xml: &str) -> Result<HashMap<String, String>, BrokerError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut attributes = HashMap::new();
    let mut current_name: Option<String> = None;
    let mut in_name = false;
    let mut in_value = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Name" => in_name = true,
                b"Value" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                if in_name {
                    current_name = Some(text);
                } else if in_value {
                    if let Some(name) = current_name.take() {
                        attributes.insert(name, text);
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Name" => in_name = false,
                b"Value" => in_value = false,
                b"Attribute" => current_name = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(attributes)
}

/// First message of a ReceiveMessage response, `None` when the poll was empty
fn parse_receive_message_response(xml: &str) -> Result<Option<BrokerMessage>, BrokerError> {
    // Bodies keep their whitespace, so text is not trimmed here
    let mut reader = Reader::from_str(xml);

    let mut in_message = false;
    let mut message_id: Option<String> = None;
    let mut receipt_handle: Option<String> = None;
    let mut body: Option<String> = None;
    let mut group_id: Option<String> = None;
    let mut receive_count: u32 = 1;

    let mut field: Option<&'static str> = None;
    let mut attribute_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Message" => in_message = true,
                b"MessageId" if in_message => field = Some("MessageId"),
                b"ReceiptHandle" if in_message => field = Some("ReceiptHandle"),
                b"Body" if in_message => {
                    field = Some("Body");
                    body.get_or_insert_with(String::new);
                }
                b"Name" if in_message => field = Some("Name"),
                b"Value" if in_message => field = Some("Value"),
                _ => {}
            },
            Ok(Event::Text(e)) if field.is_some() => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                match field {
                    Some("MessageId") => message_id = Some(text.trim().to_string()),
                    Some("ReceiptHandle") => receipt_handle = Some(text.trim().to_string()),
                    Some("Body") => body.get_or_insert_with(String::new).push_str(&text),
                    Some("Name") => attribute_name = Some(text.trim().to_string()),
                    Some("Value") => match attribute_name.as_deref() {
                        Some("ApproximateReceiveCount") => {
                            receive_count = text.trim().parse().unwrap_or(1);
                        }
                        Some("MessageGroupId") => group_id = Some(text.trim().to_string()),
                        _ => {}
                    },
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Message" if in_message => {
                    if let (Some(receipt_handle), Some(body)) = (receipt_handle, body) {
                        return Ok(Some(BrokerMessage {
                            message_id: message_id.unwrap_or_default(),
                            receipt_handle,
                            body,
                            receive_count,
                            group_id,
                        }));
                    }
                    return Err(BrokerError::MalformedResponse(
                        "Message without receipt handle or body".to_string(),
                    ));
                }
                b"Attribute" => attribute_name = None,
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(None)
}

/// Map an error response to a broker error
fn parse_error_response(xml: &str, status_code: u16) -> BrokerError {
    let code = find_element_text(xml, "Code")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown".to_string());
    let message = find_element_text(xml, "Message")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            BrokerError::QueueNotFound(message)
        }
        "NotFound" => BrokerError::TopicNotFound(message),
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "AccessDenied" => BrokerError::Authentication(format!("{}: {}", code, message)),
        "InvalidReceiptHandle" | "ReceiptHandleIsInvalid" => BrokerError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            BrokerError::Authentication(format!("{}: {}", code, message))
        }
        _ => BrokerError::Service { code, message },
    }
}

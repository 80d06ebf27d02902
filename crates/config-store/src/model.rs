//! Resource schemas delivered by the control plane.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Kind of API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiType {
    /// Plain HTTP API.
    #[default]
    Rest,
    /// Web socket API; routed by base path only.
    WebSocket,
    /// GraphQL API.
    GraphQl,
}

/// A routable API definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    /// API UUID.
    pub id: String,
    /// Display name.
    pub title: String,
    /// API version.
    pub version: String,
    /// Kind of API.
    pub api_type: ApiType,
    /// Context path the API is exposed on.
    pub base_path: String,
    /// Virtual host the API is exposed on.
    pub vhost: String,
    /// Owning organization.
    pub organization_id: String,
    /// Lifecycle state, e.g. `PUBLISHED` or `PROTOTYPED`.
    pub api_lifecycle_state: String,
    /// Operations exposed by the API.
    pub resources: Vec<Operation>,
    /// Credentials used towards the backend.
    pub endpoint_security: Option<EndpointSecurity>,
    /// Whether authentication is disabled for every operation.
    pub disable_security: bool,
}

impl Api {
    /// Operation matching `path`, and `method` when one is given.
    #[must_use]
    pub fn resource(&self, path: &str, method: Option<&str>) -> Option<&Operation> {
        self.resources
            .iter()
            .filter(|operation| operation.path == path)
            .find(|operation| method.is_none_or(|m| operation.method.eq_ignore_ascii_case(m)))
    }
}

/// A single API operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Path template.
    pub path: String,
    /// HTTP method.
    pub method: String,
    /// Throttling tier.
    pub tier: String,
    /// Security schemes required by the operation.
    pub security: Vec<String>,
}

/// Backend credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSecurity {
    /// Whether backend security is enabled.
    pub enabled: bool,
    /// Scheme, e.g. `Basic`.
    pub security_type: String,
    /// User name for the scheme.
    pub username: String,
}

/// Summary of a deployed API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiListEntry {
    /// API UUID.
    pub uuid: String,
    /// API name.
    pub name: String,
    /// API version.
    pub version: String,
    /// API context.
    pub context: String,
    /// Throttling policy name.
    pub policy: String,
    /// Kind of API.
    pub api_type: ApiType,
    /// Lifecycle state.
    pub lc_state: String,
}

/// Resource body of the API list category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiList {
    /// Deployed APIs.
    pub list: Vec<ApiListEntry>,
}

/// A consumer application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Application UUID.
    pub uuid: String,
    /// Application name.
    pub name: String,
    /// Application throttling policy.
    pub policy: String,
    /// Token type issued to the application.
    pub token_type: String,
    /// Tenant that owns the application.
    pub tenant_domain: String,
    /// Custom attributes.
    pub attributes: HashMap<String, String>,
}

/// Resource body of the applications category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationList {
    /// Applications.
    pub list: Vec<Application>,
}

/// Subscription of an application to an API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription UUID.
    pub subscription_uuid: String,
    /// Subscription throttling policy.
    pub policy_id: String,
    /// Subscribed API.
    pub api_uuid: String,
    /// Subscribing application.
    pub app_uuid: String,
    /// State, e.g. `UNBLOCKED`.
    pub subscription_state: String,
    /// Last modification time in milliseconds.
    pub time_stamp: i64,
}

/// Resource body of the subscriptions category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionList {
    /// Subscriptions.
    pub list: Vec<Subscription>,
}

/// Mapping of an OAuth consumer key to an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKeyMapping {
    /// Application UUID.
    pub application_uuid: String,
    /// OAuth consumer key.
    pub consumer_key: String,
    /// `PRODUCTION` or `SANDBOX`.
    pub key_type: String,
    /// Key manager that issued the key.
    pub key_manager: String,
    /// Deployment environment.
    pub environment: String,
}

/// Resource body of the key mapping category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationKeyMappingList {
    /// Key mappings.
    pub list: Vec<ApplicationKeyMapping>,
}

/// Application level throttling policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPolicy {
    /// Policy id.
    pub id: i32,
    /// Owning tenant id.
    pub tenant_id: i32,
    /// Policy name.
    pub name: String,
    /// Quota type, e.g. `requestCount`.
    pub quota_type: String,
}

/// Resource body of the application policy category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPolicyList {
    /// Policies.
    pub list: Vec<ApplicationPolicy>,
}

/// Subscription level throttling policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPolicy {
    /// Policy id.
    pub id: i32,
    /// Owning tenant id.
    pub tenant_id: i32,
    /// Policy name.
    pub name: String,
    /// Quota type.
    pub quota_type: String,
    /// Requests allowed per time unit.
    pub rate_limit_count: i32,
    /// Rate limit time unit.
    pub rate_limit_time_unit: String,
    /// Whether requests are rejected once the quota is reached.
    pub stop_on_quota_reach: bool,
    /// Maximum GraphQL query depth.
    pub graphql_max_depth: i32,
    /// Maximum GraphQL query complexity.
    pub graphql_max_complexity: i32,
}

/// Resource body of the subscription policy category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPolicyList {
    /// Policies.
    pub list: Vec<SubscriptionPolicy>,
}

/// Key manager configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyManagerConfig {
    /// Key manager name.
    pub name: String,
    /// Key manager type, e.g. `WSO2-IS`.
    pub key_manager_type: String,
    /// Disabled key managers are ignored.
    pub enabled: bool,
    /// Organization the key manager serves.
    pub organization: String,
    /// Issuer claim of tokens it issues.
    pub issuer: String,
    /// JWKS endpoint.
    pub jwks_url: String,
    /// PEM certificate, used when no JWKS endpoint is set.
    pub certificate: String,
    /// Claim carrying the consumer key.
    pub consumer_key_claim: String,
    /// Remote claim to local claim mappings.
    pub claim_mappings: HashMap<String, String>,
}

/// Token issuer trusted by the enforcer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenIssuer {
    /// Issuer name.
    pub name: String,
    /// Issuer claim.
    pub issuer: String,
    /// JWKS endpoint.
    pub jwks_url: String,
    /// Path or PEM of the signing certificate.
    pub certificate: String,
    /// Claim carrying the consumer key.
    pub consumer_key_claim: String,
    /// Remote claim to local claim mappings.
    pub claim_mappings: HashMap<String, String>,
    /// Whether subscriptions are checked for tokens of this issuer.
    pub validate_subscription: bool,
}

impl From<KeyManagerConfig> for TokenIssuer {
    fn from(config: KeyManagerConfig) -> Self {
        Self {
            name: config.name,
            issuer: config.issuer,
            jwks_url: config.jwks_url,
            certificate: config.certificate,
            consumer_key_claim: config.consumer_key_claim,
            claim_mappings: config.claim_mappings,
            validate_subscription: true,
        }
    }
}

/// A revoked token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedToken {
    /// Token identifier.
    pub jti: String,
    /// Expiry as seconds since the epoch.
    pub expiry_time: i64,
}

/// Condition blocking matching requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingCondition {
    /// Condition type, e.g. `API`, `APPLICATION` or `USER`.
    pub condition_type: String,
    /// Value to match.
    pub value: String,
    /// Disabled conditions are ignored.
    pub enabled: bool,
    /// Tenant the condition applies to.
    pub tenant: String,
}

/// Addresses matched by an IP blocking condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpCondition {
    /// A single address.
    Fixed(IpAddr),
    /// An inclusive range of addresses of one family.
    Range {
        /// First address in the range.
        start: IpAddr,
        /// Last address in the range.
        end: IpAddr,
    },
}

impl IpCondition {
    /// Whether `ip` falls within this condition.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match *self {
            Self::Fixed(addr) => addr == ip,
            Self::Range { start, end } => match (start, end, ip) {
                (IpAddr::V4(start), IpAddr::V4(end), IpAddr::V4(ip)) => {
                    (u32::from(start)..=u32::from(end)).contains(&u32::from(ip))
                }
                (IpAddr::V6(start), IpAddr::V6(end), IpAddr::V6(ip)) => {
                    (u128::from(start)..=u128::from(end)).contains(&u128::from(ip))
                }
                _ => false,
            },
        }
    }
}

/// IP based blocking condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBlockingCondition {
    /// Condition id.
    pub id: i32,
    /// Addresses matched.
    pub condition: IpCondition,
    /// Block everything except the matched addresses.
    pub invert: bool,
    /// Tenant the condition applies to.
    pub tenant: String,
}

/// Resource body of the throttle data category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleData {
    /// Custom throttle key templates.
    pub key_templates: Vec<String>,
    /// Blocking conditions.
    pub blocking_conditions: Vec<BlockingCondition>,
    /// IP blocking conditions.
    pub ip_blocking_conditions: Vec<IpBlockingCondition>,
}

/// Enforcer runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    /// Token validation settings.
    pub security: SecurityConfig,
    /// Token cache settings.
    pub cache: CacheConfig,
    /// Throttle event publishing settings.
    pub throttling: ThrottlingConfig,
    /// Distributed tracing settings.
    pub tracing: TracingConfig,
    /// Analytics settings.
    pub analytics: AnalyticsConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
}

/// Token validation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Issuers configured statically.
    pub token_issuers: Vec<TokenIssuer>,
}

/// Token cache settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Maximum cached entries.
    pub maximum_size: u64,
    /// Entry lifetime in minutes.
    pub expiry_minutes: u64,
}

/// Throttle event publishing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlingConfig {
    /// Whether events are published to the global throttle engine.
    pub global_publishing_enabled: bool,
    /// Broker receiving throttle events.
    pub broker_url: String,
}

/// Distributed tracing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Whether tracing is enabled.
    pub enabled: bool,
    /// Exporter type, e.g. `zipkin`.
    pub exporter_type: String,
    /// Exporter endpoint.
    pub endpoint: String,
}

/// Analytics settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Whether analytics are published.
    pub enabled: bool,
    /// Analytics authentication endpoint.
    pub auth_url: String,
    /// Analytics authentication token.
    pub auth_token: String,
}

/// Metrics settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are exposed.
    pub enabled: bool,
    /// Metrics backend, e.g. `prometheus`.
    pub metrics_type: String,
}

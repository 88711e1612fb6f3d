//! Error taxonomy for job building, collection and delivery.
//!
//! Configuration errors are raised while turning raw job definitions into
//! `JobSpec`s and exclude the offending job from the live set. Collection
//! errors are raised by source adapters during a single run and are
//! converted into instrumentation by the execution supervisor.

use thiserror::Error;

/// Invalid aggregation definition for an aggregation-style source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// Function name is neither a known aggregate nor an integer percentile.
    #[error("unsupported aggregation function '{0}'")]
    UnknownFunction(String),

    /// Percentile outside 0..=100.
    #[error("invalid aggregation percentile '{0}'")]
    PercentileOutOfRange(i64),

    /// Threshold comparison operator not recognised.
    #[error("unsupported aggregation threshold operator '{0}'")]
    UnknownOperator(String),

    /// Threshold given without an operator.
    #[error("no operator specified for aggregation threshold")]
    MissingOperator,

    /// Threshold given without a value.
    #[error("no value specified for aggregation threshold")]
    MissingValue,

    /// Threshold value is not numeric.
    #[error("invalid value '{0}' specified for aggregation threshold")]
    InvalidValue(String),
}

/// Invalid or incomplete job definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A category-specific field is missing.
    #[error("job '{job}' is missing required field(s): {fields}")]
    MissingField {
        /// Job identifier.
        job: String,
        /// Comma-separated field names.
        fields: String,
    },

    /// Job references a service that is not in the catalog.
    #[error("job '{job}' references unknown service '{service}'")]
    UnknownService {
        /// Job identifier.
        job: String,
        /// Service name as written in the job.
        service: String,
    },

    /// The same service is listed twice in one job.
    #[error("job '{job}' lists service '{service}' more than once")]
    DuplicateService {
        /// Job identifier.
        job: String,
        /// Duplicated service name.
        service: String,
    },

    /// Source services of different kinds in one job.
    #[error("job '{job}' mixes source services of different kinds")]
    MixedCategories {
        /// Job identifier.
        job: String,
    },

    /// Job declares no source services.
    #[error("job '{job}' has no source services")]
    NoSources {
        /// Job identifier.
        job: String,
    },

    /// Job references an undefined template.
    #[error("job '{job}' references undefined template '{template}'")]
    UndefinedTemplate {
        /// Job identifier.
        job: String,
        /// Template name.
        template: String,
    },

    /// `%%VAR%%` placeholders with no matching environment variable.
    #[error("'{owner}' references undefined environment variable(s): {vars}")]
    UndefinedEnvVars {
        /// Job or service owning the value.
        owner: String,
        /// Comma-separated variable names.
        vars: String,
    },

    /// Interval must be at least one minute.
    #[error("job '{job}' has an invalid interval of {minutes} minute(s)")]
    InvalidInterval {
        /// Job identifier.
        job: String,
        /// Configured minutes.
        minutes: u64,
    },

    /// Aggregation block rejected.
    #[error("job '{job}': {source}")]
    Aggregation {
        /// Job identifier.
        job: String,
        /// Underlying validation failure.
        #[source]
        source: AggregationError,
    },

    /// Definition does not match the expected shape.
    #[error("job '{job}' is malformed: {message}")]
    Malformed {
        /// Job identifier.
        job: String,
        /// Deserializer message.
        message: String,
    },
}

/// Failure of a single collection run inside a source adapter.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Could not reach or read from the source service.
    #[error("source '{service}' connection failed: {message}")]
    SourceConnection {
        /// Service name.
        service: String,
        /// Driver or transport message.
        message: String,
    },

    /// The source accepted the request but rejected the query.
    #[error("query against '{service}' failed: {message}")]
    Query {
        /// Service name.
        service: String,
        /// Driver message.
        message: String,
    },

    /// Configured value/timestamp fields are absent from the first record.
    #[error("job '{job}' result is missing configured field(s): {fields}")]
    MissingFields {
        /// Job identifier.
        job: String,
        /// Comma-separated field names.
        fields: String,
    },

    /// Job parameters do not match the adapter's category.
    #[error("job '{job}' cannot be collected by the {category} adapter")]
    CategoryMismatch {
        /// Job identifier.
        job: String,
        /// Adapter category.
        category: String,
    },
}

/// Failure delivering a snapshot to one push destination.
#[derive(Debug, Error)]
pub enum PushError {
    /// Destination name not configured.
    #[error("push destination '{0}' is not configured")]
    UnknownDestination(String),

    /// Transport-level failure.
    #[error("push to '{destination}' failed: {message}")]
    Transport {
        /// Destination name.
        destination: String,
        /// Transport message.
        message: String,
    },

    /// Destination answered with a non-success status.
    #[error("push to '{destination}' rejected with status {status}: {body}")]
    Rejected {
        /// Destination name.
        destination: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Snapshot could not be encoded.
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

/// Failure reading or rendering a job's metric registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No registry for the job id.
    #[error("no metrics registered for job '{0}'")]
    NotFound(String),

    /// Exposition encoding failed.
    #[error("failed to render metrics: {0}")]
    Render(String),
}

/// Failure fetching definitions from an external job source.
#[derive(Debug, Error)]
pub enum JobSourceError {
    /// Transport-level failure.
    #[error("job source unreachable: {0}")]
    Unreachable(String),

    /// Document could not be parsed.
    #[error("job source returned an invalid document: {0}")]
    InvalidDocument(String),

    /// Template expansion or substitution failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Scheduler operation rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// No job with the id.
    #[error("job '{0}' not found")]
    NotFound(String),

    /// A job with the id is already scheduled.
    #[error("job '{0}' is already scheduled")]
    Duplicate(String),

    /// A run of the job is in flight.
    #[error("job '{0}' is already running")]
    AlreadyRunning(String),
}

/// Failure of one reconciliation tick.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Job definitions could not be fetched.
    #[error("failed to fetch job definitions: {0}")]
    Fetch(#[from] JobSourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_error_names_job() {
        let err = ConfigError::Aggregation {
            job: "hits".to_string(),
            source: AggregationError::UnknownFunction("median".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "job 'hits': unsupported aggregation function 'median'"
        );
    }

    #[test]
    fn test_missing_fields_message() {
        let err = CollectError::MissingFields {
            job: "db_query".to_string(),
            fields: "metric, ts".to_string(),
        };
        assert!(err.to_string().contains("db_query"));
        assert!(err.to_string().contains("metric, ts"));
    }
}

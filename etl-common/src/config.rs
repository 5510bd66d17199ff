use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "false")]
    pub kafka_verify_ssl_certificate: bool,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(default = "device-etl")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "device_telemetry")]
    pub kafka_consumer_topic: String,

    // A fresh consumer group replays the whole topic, which is what a backfill wants. Set this
    // to "latest" to only pick up new telemetry.
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Interval (in milliseconds) between commits of the offsets the pipeline has stored.
    #[envconfig(default = "5000")]
    pub kafka_consumer_auto_commit_interval_ms: u32,
}

/// A duration read from the environment as a number of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.trim().parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ms_duration() {
        assert_eq!(
            "1500".parse::<EnvMsDuration>(),
            Ok(EnvMsDuration(time::Duration::from_millis(1500)))
        );
        assert_eq!(
            "0".parse::<EnvMsDuration>(),
            Ok(EnvMsDuration(time::Duration::ZERO))
        );
        assert_eq!(
            "1.5s".parse::<EnvMsDuration>(),
            Err(ParseEnvMsDurationError)
        );
    }
}

use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct RegionReplicaOptions {
    pub refresh_interval: Option<Duration>,
    pub max_concurrent_refreshes: Option<usize>,
    // Turning this off lets tests write through a secondary.
    pub enforce_read_only: Option<bool>,
}

#[derive(Clone, Debug)]
pub(super) struct RegionReplicaOptionsValidated {
    pub refresh_interval: Duration,
    pub max_concurrent_refreshes: usize,
    pub enforce_read_only: bool,
}

impl RegionReplicaOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.refresh_interval == Duration::from_secs(0) {
            return Err("Store file refresh interval must be greater than zero");
        }
        if self.max_concurrent_refreshes == 0 {
            return Err("Maximum concurrent store file refreshes must be at least 1");
        }

        Ok(())
    }
}

impl TryFrom<RegionReplicaOptions> for RegionReplicaOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RegionReplicaOptions) -> Result<Self, Self::Error> {
        let values = RegionReplicaOptionsValidated {
            refresh_interval: options.refresh_interval.unwrap_or(Duration::from_secs(5)),
            max_concurrent_refreshes: options.max_concurrent_refreshes.unwrap_or(4),
            enforce_read_only: options.enforce_read_only.unwrap_or(true),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = RegionReplicaOptionsValidated::try_from(RegionReplicaOptions::default()).unwrap();
        assert_eq!(options.refresh_interval, Duration::from_secs(5));
        assert_eq!(options.max_concurrent_refreshes, 4);
        assert!(options.enforce_read_only);
    }

    #[test]
    fn rejects_zero_interval_and_zero_concurrency() {
        let zero_interval = RegionReplicaOptions {
            refresh_interval: Some(Duration::from_secs(0)),
            ..Default::default()
        };
        assert!(RegionReplicaOptionsValidated::try_from(zero_interval).is_err());

        let zero_concurrency = RegionReplicaOptions {
            max_concurrent_refreshes: Some(0),
            ..Default::default()
        };
        assert!(RegionReplicaOptionsValidated::try_from(zero_concurrency).is_err());
    }
}

//! Geolocation resolver.
//!
//! An ordered list of strategies is tried in turn and the first fix wins.
//! Stage failures stay inside the resolver; only when every stage has failed
//! does it report `LocationUnavailable`, carrying the most actionable cause
//! seen along the way.

use attendance_daemon_protocol::{
    valid_coordinates, LocationFix, LocationSource, LocationUnavailableCause,
};
use chrono::Utc;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::{DeviceLocator, PositionOptions};
use crate::error::ResolveError;
use crate::ip::IpProvider;

pub const IP_ACCURACY_METERS: f64 = 5000.0;
const IP_RACE_TIMEOUT_SECS: u64 = 8;

pub trait LocationStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn locate(&self) -> Result<LocationFix, LocationUnavailableCause>;
}

pub struct Resolver {
    strategies: Vec<Box<dyn LocationStrategy>>,
}

impl Resolver {
    pub fn new(strategies: Vec<Box<dyn LocationStrategy>>) -> Self {
        Self { strategies }
    }

    /// High-accuracy device, then low-accuracy device, then the IP race.
    pub fn standard(
        locator: Arc<dyn DeviceLocator>,
        providers: Option<Vec<Box<dyn IpProvider>>>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn LocationStrategy>> = vec![
            Box::new(DeviceStrategy::high_accuracy(Arc::clone(&locator))),
            Box::new(DeviceStrategy::low_accuracy(locator)),
        ];
        if let Some(providers) = providers {
            strategies.push(Box::new(IpRaceStrategy::new(providers)));
        }
        Self::new(strategies)
    }

    pub fn resolve(&self) -> Result<LocationFix, ResolveError> {
        let mut worst: Option<LocationUnavailableCause> = None;
        for strategy in &self.strategies {
            match strategy.locate() {
                Ok(fix) => {
                    tracing::info!(
                        strategy = strategy.name(),
                        source = fix.source.as_str(),
                        accuracy_meters = fix.accuracy_meters,
                        "Location resolved"
                    );
                    return Ok(fix);
                }
                Err(cause) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        cause = cause.as_str(),
                        "Location stage failed"
                    );
                    worst = Some(worst.map_or(cause, |seen| seen.max(cause)));
                }
            }
        }
        let cause = worst.unwrap_or(LocationUnavailableCause::AllProvidersFailed);
        tracing::warn!(cause = cause.as_str(), "Location unavailable");
        Err(ResolveError::LocationUnavailable { cause })
    }
}

pub struct DeviceStrategy {
    name: &'static str,
    locator: Arc<dyn DeviceLocator>,
    options: PositionOptions,
    source: LocationSource,
}

impl DeviceStrategy {
    pub fn high_accuracy(locator: Arc<dyn DeviceLocator>) -> Self {
        Self {
            name: "device_high_accuracy",
            locator,
            options: PositionOptions::high_accuracy(),
            source: LocationSource::DeviceHighAccuracy,
        }
    }

    pub fn low_accuracy(locator: Arc<dyn DeviceLocator>) -> Self {
        Self {
            name: "device_low_accuracy",
            locator,
            options: PositionOptions::low_accuracy(),
            source: LocationSource::DeviceLowAccuracy,
        }
    }
}

impl LocationStrategy for DeviceStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn locate(&self) -> Result<LocationFix, LocationUnavailableCause> {
        let position = self.locator.current_position(&self.options)?;
        if !valid_coordinates(position.latitude, position.longitude)
            || !position.accuracy_meters.is_finite()
            || position.accuracy_meters < 0.0
        {
            return Err(LocationUnavailableCause::Unavailable);
        }
        Ok(LocationFix {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy_meters: position.accuracy_meters,
            source: self.source,
            captured_at: position.captured_at.to_rfc3339(),
        })
    }
}

/// Queries every provider at once and keeps the first valid answer. Slower
/// providers are left to finish on their own threads.
pub struct IpRaceStrategy {
    providers: Vec<Arc<dyn IpProvider>>,
    timeout: Duration,
}

impl IpRaceStrategy {
    pub fn new(providers: Vec<Box<dyn IpProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(Arc::from).collect(),
            timeout: Duration::from_secs(IP_RACE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LocationStrategy for IpRaceStrategy {
    fn name(&self) -> &str {
        "ip_race"
    }

    fn locate(&self) -> Result<LocationFix, LocationUnavailableCause> {
        let (sender, receiver) = mpsc::channel();
        for provider in &self.providers {
            let provider = Arc::clone(provider);
            let sender = sender.clone();
            let timeout = self.timeout;
            std::thread::spawn(move || {
                let result = provider.lookup(timeout);
                let _ = sender.send((provider.name().to_string(), result));
            });
        }
        drop(sender);

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(remaining) {
                Ok((name, Ok((latitude, longitude)))) => {
                    if valid_coordinates(latitude, longitude) {
                        return Ok(LocationFix {
                            latitude,
                            longitude,
                            accuracy_meters: IP_ACCURACY_METERS,
                            source: LocationSource::IpBased,
                            captured_at: Utc::now().to_rfc3339(),
                        });
                    }
                    tracing::debug!(provider = %name, "IP provider returned invalid coordinates");
                }
                Ok((name, Err(err))) => {
                    tracing::debug!(provider = %name, error = %err, "IP provider failed");
                }
                Err(_) => return Err(LocationUnavailableCause::AllProvidersFailed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DevicePosition;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Result<LocationFix, LocationUnavailableCause>, Arc<AtomicUsize>);

    impl LocationStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn locate(&self) -> Result<LocationFix, LocationUnavailableCause> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone()
        }
    }

    fn fix(source: LocationSource) -> LocationFix {
        LocationFix {
            latitude: 19.16,
            longitude: 72.85,
            accuracy_meters: 10.0,
            source,
            captured_at: "2026-03-09T09:00:00+00:00".to_string(),
        }
    }

    struct FakeProvider {
        name: &'static str,
        delay: Duration,
        result: Result<(f64, f64), String>,
    }

    impl IpProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn lookup(&self, _timeout: Duration) -> Result<(f64, f64), String> {
            std::thread::sleep(self.delay);
            self.result.clone()
        }
    }

    fn provider(
        name: &'static str,
        delay_ms: u64,
        result: Result<(f64, f64), String>,
    ) -> Box<dyn IpProvider> {
        Box::new(FakeProvider {
            name,
            delay: Duration::from_millis(delay_ms),
            result,
        })
    }

    struct FakeLocator(Result<DevicePosition, LocationUnavailableCause>);

    impl DeviceLocator for FakeLocator {
        fn current_position(
            &self,
            _options: &PositionOptions,
        ) -> Result<DevicePosition, LocationUnavailableCause> {
            self.0.clone()
        }
    }

    #[test]
    fn first_successful_stage_wins_and_later_stages_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = Resolver::new(vec![
            Box::new(Fixed(Err(LocationUnavailableCause::Timeout), calls.clone())),
            Box::new(Fixed(Ok(fix(LocationSource::DeviceLowAccuracy)), calls.clone())),
            Box::new(Fixed(Ok(fix(LocationSource::IpBased)), calls.clone())),
        ]);
        let resolved = resolver.resolve().expect("fix");
        assert_eq!(resolved.source, LocationSource::DeviceLowAccuracy);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exhausted_chain_reports_most_actionable_cause() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = Resolver::new(vec![
            Box::new(Fixed(Err(LocationUnavailableCause::PermissionDenied), calls.clone())),
            Box::new(Fixed(Err(LocationUnavailableCause::Timeout), calls.clone())),
            Box::new(Fixed(Err(LocationUnavailableCause::AllProvidersFailed), calls.clone())),
        ]);
        assert_eq!(
            resolver.resolve(),
            Err(ResolveError::LocationUnavailable {
                cause: LocationUnavailableCause::PermissionDenied
            })
        );
    }

    #[test]
    fn empty_chain_reports_all_providers_failed() {
        let resolver = Resolver::new(Vec::new());
        assert_eq!(
            resolver.resolve().map_err(|err| err.cause()),
            Err(LocationUnavailableCause::AllProvidersFailed)
        );
    }

    #[test]
    fn device_stage_rejects_impossible_coordinates() {
        let locator = Arc::new(FakeLocator(Ok(DevicePosition {
            latitude: 120.0,
            longitude: 72.0,
            accuracy_meters: 5.0,
            captured_at: Utc::now(),
        })));
        let strategy = DeviceStrategy::high_accuracy(locator);
        assert_eq!(strategy.locate(), Err(LocationUnavailableCause::Unavailable));
    }

    #[test]
    fn device_stage_tags_source() {
        let locator = Arc::new(FakeLocator(Ok(DevicePosition {
            latitude: 19.16,
            longitude: 72.85,
            accuracy_meters: 35.0,
            captured_at: Utc::now(),
        })));
        let strategy = DeviceStrategy::low_accuracy(locator);
        assert_eq!(
            strategy.locate().map(|fix| fix.source),
            Ok(LocationSource::DeviceLowAccuracy)
        );
    }

    #[test]
    fn ip_race_takes_first_valid_response() {
        let race = IpRaceStrategy::new(vec![
            provider("slow", 500, Ok((10.0, 10.0))),
            provider("broken", 0, Err("boom".to_string())),
            provider("fast", 20, Ok((19.07, 72.88))),
        ])
        .with_timeout(Duration::from_secs(2));
        let started = Instant::now();
        let fix = race.locate().expect("ip fix");
        assert_eq!((fix.latitude, fix.longitude), (19.07, 72.88));
        assert_eq!(fix.accuracy_meters, IP_ACCURACY_METERS);
        assert_eq!(fix.source, LocationSource::IpBased);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn ip_race_skips_invalid_coordinates() {
        let race = IpRaceStrategy::new(vec![
            provider("bogus", 0, Ok((95.0, 10.0))),
            provider("good", 50, Ok((19.07, 72.88))),
        ])
        .with_timeout(Duration::from_secs(2));
        assert_eq!(race.locate().map(|fix| fix.latitude), Ok(19.07));
    }

    #[test]
    fn ip_race_fails_when_every_provider_fails_or_times_out() {
        let race = IpRaceStrategy::new(vec![
            provider("broken", 0, Err("boom".to_string())),
            provider("hung", 1_000, Ok((19.0, 72.0))),
        ])
        .with_timeout(Duration::from_millis(100));
        assert_eq!(
            race.locate(),
            Err(LocationUnavailableCause::AllProvidersFailed)
        );
    }

    #[test]
    fn standard_chain_falls_through_to_ip_race() {
        let locator = Arc::new(FakeLocator(Err(LocationUnavailableCause::Timeout)));
        let resolver = Resolver::standard(locator, Some(vec![provider("ok", 0, Ok((19.1, 72.8)))]));
        let fix = resolver.resolve().expect("ip fallback");
        assert_eq!(fix.source, LocationSource::IpBased);
    }

    #[test]
    fn standard_chain_without_ip_keeps_device_cause() {
        let locator = Arc::new(FakeLocator(Err(LocationUnavailableCause::PermissionDenied)));
        let resolver = Resolver::standard(locator, None);
        assert_eq!(
            resolver.resolve().map_err(|err| err.cause()),
            Err(LocationUnavailableCause::PermissionDenied)
        );
    }
}

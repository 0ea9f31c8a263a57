//! Outbox delivery and redelivery.
//!
//! A dispatchable is written in the same transaction as the state and
//! entries it carries, handed to the [`Dispatcher`] right after commit, and
//! deleted once the dispatcher confirms it by id. Until then it stays
//! pending, and the [`DispatcherControl`] sweep redelivers it every time it
//! is found older than the confirmation expiration. Delivery is therefore
//! at-least-once; consumers must tolerate duplicates.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use strata_core::Dispatchable;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Configuration;
use crate::delegate::{DelegateFactory, StorageDelegate, transactionally};
use crate::errors::Result;

/// Confirmation handle given to a dispatcher.
pub trait ConfirmDispatched: Send + Sync {
    /// Mark a dispatchable delivered. Confirming an unknown id succeeds.
    fn confirm_dispatched(&self, dispatchable_id: &str) -> Result<()>;
}

/// Receives dispatchables after their transaction commits.
pub trait Dispatcher: Send + Sync {
    /// Called once when a store wires up its control, before any dispatch.
    fn control_with(&self, control: Arc<dyn ConfirmDispatched>) {
        let _ = control;
    }

    /// Deliver a dispatchable. Confirmation happens out of band.
    fn dispatch(&self, dispatchable: Dispatchable);
}

/// Confirms deliveries and periodically redelivers expired ones.
///
/// Owns its own delegate, so sweeps never contend with the store's
/// transactions. Only dispatchables written under its originator id are
/// swept.
pub struct DispatcherControl {
    delegate: Mutex<Box<dyn StorageDelegate>>,
    dispatcher: Weak<dyn Dispatcher>,
    originator_id: String,
    check_interval: Duration,
    confirmation_expiration: Duration,
}

impl DispatcherControl {
    /// Control over `delegate`, redelivering rows written under
    /// `originator_id` to `dispatcher`.
    ///
    /// Only a weak reference to the dispatcher is kept; sweeps stop
    /// delivering once the caller drops it.
    pub fn new(
        delegate: Box<dyn StorageDelegate>,
        dispatcher: &Arc<dyn Dispatcher>,
        originator_id: impl Into<String>,
        config: &Configuration,
    ) -> Self {
        Self {
            delegate: Mutex::new(delegate),
            dispatcher: Arc::downgrade(dispatcher),
            originator_id: originator_id.into(),
            check_interval: config.check_interval,
            confirmation_expiration: config.confirmation_expiration,
        }
    }

    /// Originator whose outbox rows this control sweeps.
    pub fn originator_id(&self) -> &str {
        &self.originator_id
    }

    /// Period of [`spawn`](Self::spawn)'s sweep.
    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Delete the pending row for `dispatchable_id`.
    pub fn confirm(&self, dispatchable_id: &str) -> Result<()> {
        let mut delegate = self.delegate.lock();
        delegate.ensure_connection()?;
        transactionally(&mut **delegate, |d| d.delete_dispatchable(dispatchable_id))?;
        debug!(dispatch_id = dispatchable_id, "dispatch confirmed");
        Ok(())
    }

    /// Redeliver every pending dispatchable older than the confirmation
    /// expiration. Returns how many were redelivered.
    pub fn dispatch_unconfirmed(&self) -> Result<usize> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            debug!(originator = %self.originator_id, "dispatcher dropped, skipping sweep");
            return Ok(0);
        };

        let pending = {
            let mut delegate = self.delegate.lock();
            delegate.ensure_connection()?;
            delegate.query_unconfirmed_dispatchables(&self.originator_id)?
        };

        let now = Utc::now();
        let mut redelivered = 0;
        for dispatchable in pending {
            if !dispatchable.is_older_than(self.confirmation_expiration, now) {
                continue;
            }
            debug!(dispatch_id = %dispatchable.id, "redelivering unconfirmed dispatchable");
            dispatcher.dispatch(dispatchable);
            redelivered += 1;
        }
        Ok(redelivered)
    }

    /// Run [`dispatch_unconfirmed`](Self::dispatch_unconfirmed) every check
    /// interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.check_interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let control = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || control.dispatch_unconfirmed()).await {
                            Ok(Ok(0)) => {}
                            Ok(Ok(count)) => {
                                debug!(count, originator = %self.originator_id, "redelivery sweep done");
                            }
                            Ok(Err(err)) => {
                                warn!(error = %err, originator = %self.originator_id, "redelivery sweep failed");
                            }
                            Err(err) => {
                                error!(error = %err, "redelivery sweep panicked");
                            }
                        }
                    }
                    () = cancel.cancelled() => {
                        debug!(originator = %self.originator_id, "dispatcher control stopped");
                        return;
                    }
                }
            }
        })
    }

    /// Release the control's connection.
    pub fn close(&self) {
        self.delegate.lock().close();
    }
}

impl ConfirmDispatched for DispatcherControl {
    fn confirm_dispatched(&self, dispatchable_id: &str) -> Result<()> {
        self.confirm(dispatchable_id)
    }
}

/// The dispatcher side of a store: who to deliver to, under which
/// originator, and the control that confirms and redelivers.
pub(crate) struct Outbox {
    dispatcher: Arc<dyn Dispatcher>,
    control: Arc<DispatcherControl>,
}

impl Outbox {
    /// Build the control for `dispatcher` and hand it the confirmation
    /// handle. Every store attaches under its own `originator_id`, so a
    /// sweep never picks up rows another store's dispatcher owns.
    pub(crate) fn attach(
        factory: &dyn DelegateFactory,
        dispatcher: Arc<dyn Dispatcher>,
        originator_id: String,
    ) -> Self {
        let control = Arc::new(DispatcherControl::new(
            factory.create_delegate(),
            &dispatcher,
            originator_id,
            factory.configuration(),
        ));
        dispatcher.control_with(Arc::clone(&control) as Arc<dyn ConfirmDispatched>);
        Self {
            dispatcher,
            control,
        }
    }

    /// Record `dispatchable` inside the caller's open transaction.
    pub(crate) fn record(
        &self,
        delegate: &mut dyn StorageDelegate,
        dispatchable: &Dispatchable,
    ) -> Result<()> {
        delegate.append_dispatchable(&self.control.originator_id, dispatchable)
    }

    /// Hand a committed dispatchable to the dispatcher.
    pub(crate) fn dispatch(&self, dispatchable: Dispatchable) {
        debug!(dispatch_id = %dispatchable.id, "dispatching");
        self.dispatcher.dispatch(dispatchable);
    }

    pub(crate) fn control(&self) -> &Arc<DispatcherControl> {
        &self.control
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.control.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration as TimeDelta;

    use super::*;
    use crate::delegate::MockStorageDelegate;
    use crate::errors::StorageError;

    /// Records every delivery and keeps the confirmation handle.
    #[derive(Default)]
    pub(crate) struct RecordingDispatcher {
        pub(crate) delivered: Mutex<Vec<Dispatchable>>,
        pub(crate) control: Mutex<Option<Arc<dyn ConfirmDispatched>>>,
    }

    impl RecordingDispatcher {
        pub(crate) fn delivered_ids(&self) -> Vec<String> {
            self.delivered.lock().iter().map(|d| d.id.clone()).collect()
        }
    }

    impl Dispatcher for RecordingDispatcher {
        fn control_with(&self, control: Arc<dyn ConfirmDispatched>) {
            *self.control.lock() = Some(control);
        }

        fn dispatch(&self, dispatchable: Dispatchable) {
            self.delivered.lock().push(dispatchable);
        }
    }

    fn config(expiration: Duration) -> Configuration {
        Configuration {
            originator_id: "billing".into(),
            check_interval: Duration::from_millis(10),
            confirmation_expiration: expiration,
            ..Configuration::default()
        }
    }

    fn aged(id: &str, age_secs: i64) -> Dispatchable {
        Dispatchable::with(id, Utc::now() - TimeDelta::seconds(age_secs), None, Vec::new())
    }

    #[test]
    fn sweep_redelivers_only_expired() {
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_ensure_connection().returning(|| Ok(()));
        delegate
            .expect_query_unconfirmed_dispatchables()
            .withf(|originator| originator == "billing")
            .returning(|_| Ok(vec![aged("dsp_old", 60), aged("dsp_new", 0)]));

        let recorder = Arc::new(RecordingDispatcher::default());
        let dispatcher: Arc<dyn Dispatcher> = recorder.clone();
        let control = DispatcherControl::new(
            Box::new(delegate),
            &dispatcher,
            "billing",
            &config(Duration::from_secs(30)),
        );

        assert_eq!(control.dispatch_unconfirmed().unwrap(), 1);
        assert_eq!(recorder.delivered_ids(), vec!["dsp_old".to_string()]);
    }

    #[test]
    fn sweep_failure_is_reported() {
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_ensure_connection().returning(|| Ok(()));
        delegate
            .expect_query_unconfirmed_dispatchables()
            .returning(|_| Err(StorageError::Sqlite(rusqlite::Error::InvalidQuery)));

        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher::default());
        let control = DispatcherControl::new(
            Box::new(delegate),
            &dispatcher,
            "billing",
            &config(Duration::ZERO),
        );
        assert_matches!(control.dispatch_unconfirmed(), Err(StorageError::Sqlite(_)));
    }

    #[test]
    fn sweep_skipped_once_dispatcher_dropped() {
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_query_unconfirmed_dispatchables().never();

        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher::default());
        let control = DispatcherControl::new(
            Box::new(delegate),
            &dispatcher,
            "billing",
            &config(Duration::ZERO),
        );
        drop(dispatcher);
        assert_eq!(control.dispatch_unconfirmed().unwrap(), 0);
    }

    #[test]
    fn confirm_deletes_in_transaction() {
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_ensure_connection().returning(|| Ok(()));
        delegate.expect_begin_transaction().times(1).returning(|| Ok(()));
        delegate
            .expect_delete_dispatchable()
            .withf(|id| id == "dsp_1")
            .times(1)
            .returning(|_| Ok(()));
        delegate.expect_timeout_check().returning(|| Ok(()));
        delegate.expect_commit().times(1).returning(|| Ok(()));

        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher::default());
        let control = DispatcherControl::new(
            Box::new(delegate),
            &dispatcher,
            "billing",
            &config(Duration::ZERO),
        );
        control.confirm_dispatched("dsp_1").unwrap();
    }

    #[test]
    fn attach_hands_control_to_dispatcher() {
        struct Factory(Configuration);
        impl DelegateFactory for Factory {
            fn create_delegate(&self) -> Box<dyn StorageDelegate> {
                let mut delegate = MockStorageDelegate::new();
                delegate.expect_close().returning(|| ());
                Box::new(delegate)
            }
            fn configuration(&self) -> &Configuration {
                &self.0
            }
        }

        let recorder = Arc::new(RecordingDispatcher::default());
        let outbox = Outbox::attach(
            &Factory(config(Duration::ZERO)),
            recorder.clone(),
            "billing.journal".into(),
        );
        assert!(recorder.control.lock().is_some());
        assert_eq!(outbox.control().originator_id(), "billing.journal");
    }

    #[tokio::test]
    async fn spawned_sweep_runs_until_cancelled() {
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_ensure_connection().returning(|| Ok(()));
        delegate
            .expect_query_unconfirmed_dispatchables()
            .returning(|_| Ok(vec![aged("dsp_stuck", 60)]));

        let recorder = Arc::new(RecordingDispatcher::default());
        let dispatcher: Arc<dyn Dispatcher> = recorder.clone();
        let control = Arc::new(DispatcherControl::new(
            Box::new(delegate),
            &dispatcher,
            "billing",
            &config(Duration::ZERO),
        ));

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&control).spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let delivered = recorder.delivered_ids();
        assert!(delivered.len() >= 2, "expected repeated redelivery, got {delivered:?}");
        assert!(delivered.iter().all(|id| id == "dsp_stuck"));
    }

    #[tokio::test]
    async fn cancelled_before_first_tick_stops() {
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(RecordingDispatcher::default());
        let mut delegate = MockStorageDelegate::new();
        delegate.expect_ensure_connection().returning(|| Ok(()));
        delegate
            .expect_query_unconfirmed_dispatchables()
            .returning(|_| Ok(Vec::new()));
        let control = Arc::new(DispatcherControl::new(
            Box::new(delegate),
            &dispatcher,
            "billing",
            &Configuration {
                check_interval: Duration::from_secs(3600),
                ..config(Duration::ZERO)
            },
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        control.spawn(cancel).await.unwrap();
    }
}

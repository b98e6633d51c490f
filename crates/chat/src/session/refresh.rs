use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::{IdentityProvider, Session, SessionState};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(50 * 60);

/// Keeps the session credential fresh until the user signs out.
///
/// A failed refresh is logged and the current credential is kept; the next tick tries again.
pub fn spawn_token_refresh(
    session: Session,
    provider: Arc<dyn IdentityProvider>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut changes = session.subscribe();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *changes.borrow_and_update() == SessionState::SignedOut {
                        tracing::debug!("session signed out, stopping token refresh");
                        break;
                    }
                    continue;
                }
            }

            let Some(identity) = session.current().identity().cloned() else {
                break;
            };

            match provider.refresh(&identity).await {
                Ok(refreshed) => {
                    session.replace_credential(refreshed);
                }
                Err(error) => {
                    tracing::warn!(
                        user_id = %identity.user_id,
                        error = %error,
                        "token refresh failed, keeping current credential"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::session::tests::{FakeIdentity, identity};

    #[tokio::test(start_paused = true)]
    async fn credential_is_replaced_every_period() {
        let session = Session::new();
        session.set_identity(identity("maria", "tok-0"));
        let provider = Arc::new(FakeIdentity::default());

        let handle = spawn_token_refresh(
            session.clone(),
            provider.clone(),
            Duration::from_secs(60),
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(session.credential().as_deref(), Some("tok-1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(session.credential().as_deref(), Some("tok-2"));
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn task_stops_on_sign_out() {
        let session = Session::new();
        session.set_identity(identity("maria", "tok-0"));
        let provider = Arc::new(FakeIdentity::default());

        let handle = spawn_token_refresh(
            session.clone(),
            provider.clone(),
            Duration::from_secs(60),
        );
        tokio::task::yield_now().await;

        session.sign_out();
        handle.await.unwrap();
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
    }
}

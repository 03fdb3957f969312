use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::error::Error;

// Cooperative cancellation for scans that are unbounded in the size of the
// table (index cache construction, read_all). Clones share one flag, so a
// caller can keep a handle and trip it from elsewhere while a scan is
// checking `check` between records.
#[derive(Clone, Debug, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(timeout: Duration) -> Self {
        Cancel {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn check(&self) -> anyhow::Result<()> {
        if self.flag.load(Ordering::Relaxed) {
            return Err(Error::Cancelled.into());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::error::Error;

    use super::Cancel;

    #[test]
    fn test_cancel() {
        let c = Cancel::new();
        assert!(c.check().is_ok());

        let handle = c.clone();
        handle.cancel();
        let err = c.check().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::Cancelled));
    }

    #[test]
    fn test_deadline() {
        let c = Cancel::with_deadline(Duration::from_secs(3600));
        assert!(c.check().is_ok());

        let c = Cancel::with_deadline(Duration::ZERO);
        let err = c.check().unwrap_err();
        assert_eq!(err.downcast_ref::<Error>(), Some(&Error::DeadlineExceeded));
    }
}

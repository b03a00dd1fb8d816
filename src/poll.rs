//! Waiting for the next new file.
//!
//! The registry has no push channel, so the client lists it over and over
//! and diffs consecutive listings. A file counts as new when either
//!
//! * its date is later than the wait start minus the allowed age, or
//! * once a first listing has been seen, its tag was absent from the
//!   previous listing.
//!
//! The date rule catches a tag that was replaced while waiting. The tag rule
//! catches uploads whose server date lands at or before the threshold, which
//! happens with coarse or skewed clocks.
//!
//! When several files qualify in one listing the one with the latest date
//! wins, and among equal dates the lexicographically smallest tag.
use std::collections::HashSet;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use log::{
    debug,
    info,
};

use crate::client::{
    Client,
    Progress,
};
use crate::clock::Clock;
use crate::entry::FileEntry;
use crate::error::{
    Error,
    Result,
};

/// Idle time between two listings unless configured otherwise.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Source of registry snapshots.
pub trait Lister {
    fn list(&self) -> Result<Vec<FileEntry>>;
}

impl Lister for Client {
    fn list(&self) -> Result<Vec<FileEntry>> {
        Client::list(self)
    }
}

impl<F: Fn() -> Result<Vec<FileEntry>>> Lister for F {
    fn list(&self) -> Result<Vec<FileEntry>> {
        self()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// No listing seen yet; only the date rule applies.
    Init,
    /// Tags present in the last listing.
    Waiting {
        known_tags: HashSet<String>,
    },
    Found(FileEntry),
}

/// Pick the new file in `snapshot`, if any.
///
/// # Arguments
///
/// * `snapshot` - One full listing.
/// * `threshold` - Files dated strictly after this are new.
/// * `known_tags` - Tags of the previous listing; `None` before the first one.
pub fn pick_candidate<'a>(snapshot: &'a [FileEntry], threshold: DateTime<Utc>, known_tags: Option<&HashSet<String>>) -> Option<&'a FileEntry> {
    snapshot
        .iter()
        .filter(|e| {
            e.date > threshold || known_tags.map_or(false, |k| !k.contains(&e.tag))
        })
        .max_by(|a, b| a.date.cmp(&b.date).then_with(|| b.tag.cmp(&a.tag)))
}

/// Repeatedly lists the registry until a new file shows up.
pub struct Poller<'a> {
    lister: &'a dyn Lister,
    clock: &'a dyn Clock,
    threshold: DateTime<Utc>,
    interval: Duration,
    cancel: Option<Arc<AtomicBool>>,
    state: PollState,
    polls: usize,
}

impl<'a> Poller<'a> {

    /// Start waiting now. Files up to `age` old at this instant count as new.
    pub fn new(lister: &'a dyn Lister, clock: &'a dyn Clock, age: Duration) -> Poller<'a> {
        let now = clock.now();
        let threshold = chrono::Duration::from_std(age)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        debug!("waiting for files newer than {}", threshold);
        Poller {
            lister,
            clock,
            threshold,
            interval: DEFAULT_INTERVAL,
            cancel: None,
            state: PollState::Init,
            polls: 0,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Poller<'a> {
        self.interval = interval;
        self
    }

    /// Stop waiting with [Error::Interrupted] once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Poller<'a> {
        self.cancel = Some(flag);
        self
    }

    pub fn threshold(&self) -> DateTime<Utc> {
        self.threshold
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Number of listings taken so far.
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// Take one listing and advance the state machine.
    ///
    /// Listing failures are returned as they are; the state is left as it was.
    pub fn poll(&mut self) -> Result<Option<FileEntry>> {
        if let PollState::Found(e) = &self.state {
            return Ok(Some(e.clone()));
        }

        let snapshot = self.lister.list()?;
        self.polls += 1;

        let known = match &self.state {
            PollState::Waiting { known_tags } => Some(known_tags),
            _ => None,
        };
        match pick_candidate(&snapshot, self.threshold, known) {
            Some(e) => {
                info!("new file {:?} ({}) after {} polls", e.tag, e.name, self.polls);
                self.state = PollState::Found(e.clone());
                Ok(Some(e.clone()))
            },
            None => {
                let known_tags: HashSet<String> = snapshot.into_iter().map(|e| e.tag).collect();
                debug!("poll {}: nothing new among {} files", self.polls, known_tags.len());
                self.state = PollState::Waiting {
                    known_tags,
                };
                Ok(None)
            },
        }
    }

    fn cancelled(&self) -> bool {
        match &self.cancel {
            Some(v) => v.load(Ordering::SeqCst),
            None => false,
        }
    }

    /// Poll until a new file is found, idling `interval` between listings.
    pub fn wait(&mut self) -> Result<FileEntry> {
        loop {
            if self.cancelled() {
                return Err(Error::Interrupted);
            }
            if let Some(e) = self.poll()? {
                return Ok(e);
            }
            self.clock.sleep(self.interval);
        }
    }
}

/// Wait for the next new file in the registry and download it to `dest`.
///
/// `found` sees the file before its download starts, so it is reported even
/// when the download fails.
///
/// # Arguments
///
/// * `client` - Registry to watch and fetch from.
/// * `clock` - Time source for the threshold and the idle waits.
/// * `age` - How old a file may be at the start and still count as new.
/// * `interval` - Idle time between listings.
/// * `cancel` - Interrupt flag, checked between listings.
/// * `dest` - Download destination.
/// * `found` - Told about the new file.
/// * `progress` - Download progress sink.
pub fn wait_and_download(client: &Client, clock: &dyn Clock, age: Duration, interval: Duration, cancel: Option<Arc<AtomicBool>>, dest: &Path, found: &mut dyn FnMut(&FileEntry), progress: &mut dyn Progress) -> Result<(FileEntry, PathBuf)> {
    let mut poller = Poller::new(client, clock, age).with_interval(interval);
    if let Some(flag) = cancel {
        poller = poller.with_cancel(flag);
    }
    let entry = poller.wait()?;
    found(&entry);
    let path = client.download(&entry.tag, dest, progress)?;
    Ok((entry, path))
}

#[cfg(test)]
mod tests {
    use super::{
        pick_candidate,
        PollState,
        Poller,
    };
    use crate::clock::ManualClock;
    use crate::entry::FileEntry;
    use crate::error::{
        Error,
        Result,
    };
    use chrono::{
        DateTime,
        Duration as ChronoDuration,
        TimeZone,
        Utc,
    };
    use std::cell::RefCell;
    use std::collections::{
        HashSet,
        VecDeque,
    };
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn entry(tag: &str, offset_secs: i64) -> FileEntry {
        FileEntry {
            tag: tag.to_string(),
            name: format!("{}.bin", tag),
            date: t0() + ChronoDuration::seconds(offset_secs),
            url: format!("http://localhost/files/{}", tag),
            size: 1,
            digest: String::new(),
        }
    }

    /// Hands out prepared listings, repeating the last one.
    struct Script {
        snapshots: RefCell<VecDeque<Result<Vec<FileEntry>>>>,
        last: RefCell<Vec<FileEntry>>,
    }

    impl Script {
        fn new(snapshots: Vec<Result<Vec<FileEntry>>>) -> Script {
            Script {
                snapshots: RefCell::new(snapshots.into()),
                last: RefCell::new(vec![]),
            }
        }

        fn list(&self) -> Result<Vec<FileEntry>> {
            match self.snapshots.borrow_mut().pop_front() {
                Some(Ok(v)) => {
                    *self.last.borrow_mut() = v.clone();
                    Ok(v)
                },
                Some(Err(e)) => Err(e),
                None => Ok(self.last.borrow().clone()),
            }
        }
    }

    #[test]
    fn test_pick_latest_then_smallest_tag() {
        let snap = vec![entry("b", 5), entry("a", 5), entry("c", 3)];
        let known: HashSet<String> = HashSet::new();
        assert_eq!(pick_candidate(&snap, t0(), None).unwrap().tag, "a");
        assert_eq!(pick_candidate(&snap, t0(), Some(&known)).unwrap().tag, "a");
        assert!(pick_candidate(&snap, t0() + ChronoDuration::seconds(5), None).is_none());
    }

    #[test]
    fn test_new_tag_at_threshold_detected_after_first_listing() {
        let clock = ManualClock::new(t0());
        let script = Script::new(vec![
            Ok(vec![entry("old", -60)]),
            Ok(vec![entry("old", -60), entry("fresh", 0)]),
        ]);
        let lister = || script.list();
        let mut poller = Poller::new(&lister, &clock, Duration::ZERO);

        assert_eq!(poller.poll().unwrap(), None);
        match poller.state() {
            PollState::Waiting { known_tags } => {
                assert!(known_tags.contains("old"));
            },
            other => {
                panic!("unexpected state {:?}", other);
            },
        }
        // "fresh" is dated exactly at the threshold, only the tag rule sees it
        assert_eq!(poller.poll().unwrap().unwrap().tag, "fresh");
        assert!(matches!(poller.state(), PollState::Found(_)));
    }

    #[test]
    fn test_first_listing_only_uses_date() {
        let clock = ManualClock::new(t0());
        let script = Script::new(vec![Ok(vec![entry("old", -60), entry("older", -3600)])]);
        let lister = || script.list();
        let mut poller = Poller::new(&lister, &clock, Duration::ZERO);
        for _ in 0..5 {
            assert_eq!(poller.poll().unwrap(), None);
        }
        assert_eq!(poller.polls(), 5);
    }

    #[test]
    fn test_age_admits_recent_files() {
        let clock = ManualClock::new(t0());
        let script = Script::new(vec![Ok(vec![entry("recent", -30), entry("old", -600)])]);
        let lister = || script.list();
        let mut poller = Poller::new(&lister, &clock, Duration::from_secs(60));
        assert_eq!(poller.threshold(), t0() - ChronoDuration::seconds(60));
        assert_eq!(poller.poll().unwrap().unwrap().tag, "recent");
    }

    #[test]
    fn test_replaced_tag_detected() {
        let clock = ManualClock::new(t0());
        let script = Script::new(vec![
            Ok(vec![entry("log", -10)]),
            Ok(vec![entry("log", -10)]),
            Ok(vec![entry("log", 2)]),
        ]);
        let lister = || script.list();
        let mut poller = Poller::new(&lister, &clock, Duration::ZERO);
        let found = poller.wait().unwrap();
        assert_eq!(found.tag, "log");
        assert_eq!(found.date, t0() + ChronoDuration::seconds(2));
        assert_eq!(poller.polls(), 3);
    }

    #[test]
    fn test_wait_sleeps_between_polls() {
        let clock = ManualClock::new(t0());
        let script = Script::new(vec![
            Ok(vec![]),
            Ok(vec![]),
            Ok(vec![entry("x", -100)]),
        ]);
        let lister = || script.list();
        let mut poller = Poller::new(&lister, &clock, Duration::ZERO).with_interval(Duration::from_secs(5));
        assert_eq!(poller.wait().unwrap().tag, "x");
        assert_eq!(clock_secs(&clock), 10);
    }

    fn clock_secs(clock: &ManualClock) -> i64 {
        use crate::clock::Clock;
        (clock.now() - t0()).num_seconds()
    }

    #[test]
    fn test_list_error_surfaces() {
        let clock = ManualClock::new(t0());
        let script = Script::new(vec![
            Ok(vec![entry("a", -5)]),
            Err(Error::Transport(String::from("connection refused"))),
            Ok(vec![entry("a", -5), entry("b", -5)]),
        ]);
        let lister = || script.list();
        let mut poller = Poller::new(&lister, &clock, Duration::ZERO);
        assert_eq!(poller.poll().unwrap(), None);
        assert!(matches!(poller.poll(), Err(Error::Transport(_))));
        // known tags survive the failed listing
        assert_eq!(poller.poll().unwrap().unwrap().tag, "b");
    }

    #[test]
    fn test_cancel() {
        let clock = ManualClock::new(t0());
        let lister = || -> Result<Vec<FileEntry>> { Ok(vec![]) };
        let flag = Arc::new(AtomicBool::new(true));
        let mut poller = Poller::new(&lister, &clock, Duration::ZERO).with_cancel(flag);
        assert!(matches!(poller.wait(), Err(Error::Interrupted)));
        assert_eq!(poller.polls(), 0);
    }
}

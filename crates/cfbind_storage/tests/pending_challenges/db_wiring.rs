#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;

use cfbind_contracts::binding::{ChallengeToken, PendingChallenge, PlatformUserId};
use cfbind_contracts::{UnixTimeMs, MS_PER_DAY};
use cfbind_storage::pending::PendingChallengeRegistry;

fn user(id: &str) -> PlatformUserId {
    PlatformUserId::new(id).unwrap()
}

fn challenge(user_id: &str, token: &str, at: u64) -> PendingChallenge {
    PendingChallenge::v1(user(user_id), ChallengeToken::new(token).unwrap(), UnixTimeMs(at)).unwrap()
}

#[test]
fn at_pending_01_sweep_removes_only_stale_entries() {
    let reg = PendingChallengeRegistry::new();
    let now = 10 * MS_PER_DAY;
    reg.set(challenge("eight_days", "AAAAAAAA", now - 8 * MS_PER_DAY));
    reg.set(challenge("seven_days", "BBBBBBBB", now - 7 * MS_PER_DAY));
    reg.set(challenge("one_day", "CCCCCCCC", now - MS_PER_DAY));

    let cutoff = UnixTimeMs(now).saturating_sub_days(7);
    assert_eq!(reg.sweep_older_than(cutoff), 1);
    assert!(reg.get(&user("eight_days")).is_none());
    assert!(reg.get(&user("seven_days")).is_some());
    assert!(reg.get(&user("one_day")).is_some());

    // Second pass finds nothing more to do.
    assert_eq!(reg.sweep_older_than(cutoff), 0);
}

#[test]
fn at_pending_02_concurrent_set_and_sweep_keep_map_consistent() {
    let reg = Arc::new(PendingChallengeRegistry::new());

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for i in 0..250u64 {
                    let id = format!("w{w}_u{i}");
                    reg.set(challenge(&id, "AbC123Xy", i));
                    let _ = reg.get(&user(&id));
                }
            })
        })
        .collect();
    let sweeper = {
        let reg = Arc::clone(&reg);
        thread::spawn(move || {
            let mut removed = 0u32;
            for _ in 0..50 {
                removed += reg.sweep_older_than(UnixTimeMs(100));
            }
            removed
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    let removed_during = sweeper.join().unwrap();
    let removed_after = reg.sweep_older_than(UnixTimeMs(100));

    // Every entry started below 100 is gone exactly once; the rest remain.
    assert_eq!(removed_during + removed_after, 4 * 100);
    assert_eq!(reg.len(), 4 * 150);
}

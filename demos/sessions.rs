//! Session-store walkthrough: TTL expiry, extension on hit, and callbacks.
//!
//! Three sessions go in with a short idle timeout.  One of them keeps
//! getting used, so every read pushes its deadline out; the other two go
//! idle and the expiration thread reaps them.
//!
//! Run with:
//!     cargo run --example sessions

use lungo::CacheBuilder;
use std::thread::sleep;
use std::time::Duration;

/// Idle timeout for every session.
const SESSION_TTL: Duration = Duration::from_millis(150);

/// How often the active user touches their session.
const ACTIVITY_PERIOD: Duration = Duration::from_millis(50);

fn main() {
    let sessions: lungo::Cache<String, String> = CacheBuilder::new()
        .time_to_live(SESSION_TTL)
        .new_item_callback(|id: &String, user| println!("  login: {id} ({user})"))
        .expiration_callback(|id: &String, _user| println!("  idle timeout: {id}"))
        .remove_callback(|id: &String, _user| println!("  session gone: {id}"))
        .build();

    println!("creating three sessions:");
    sessions.insert("sess-1".to_string(), "alice".to_string());
    sessions.insert("sess-2".to_string(), "bob".to_string());
    sessions.insert("sess-3".to_string(), "carol".to_string());

    println!("sess-2 stays active; the others go idle:");
    for _ in 0..6 {
        sleep(ACTIVITY_PERIOD);
        if let Some(user) = sessions.get(&"sess-2".to_string()) {
            println!("  activity on sess-2 ({user})");
        }
    }

    // By now sess-1 and sess-3 have been idle far past their timeout.
    println!(
        "live sessions after the idle period: {}",
        sessions.entry_count()
    );
    assert!(sessions.contains(&"sess-2".to_string()));

    let stats = sessions.stats();
    println!(
        "stats: {} hits, {} misses, {} expirations",
        stats.hits, stats.misses, stats.expirations
    );

    sessions.close();
    println!("closed; expiration thread joined");
}

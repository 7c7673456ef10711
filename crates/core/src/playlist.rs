//! Ordered clip queue with a single "now playing" pointer.

use serde::Serialize;
use std::collections::VecDeque;

/// Opaque media reference as handed to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clip {
    pub reference: String,
    pub is_question: bool,
    /// Whether the microphone should be open while this clip plays.
    pub mic_open: bool,
}

impl Clip {
    pub fn system(reference: impl Into<String>, mic_open: bool) -> Self {
        Self {
            reference: reference.into(),
            is_question: false,
            mic_open,
        }
    }

    pub fn question(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            is_question: true,
            mic_open: false,
        }
    }
}

/// Receives every change of the "now playing" clip. `None` means drained.
pub trait PlaylistObserver: Send {
    fn now_playing(&mut self, clip: Option<&Clip>);
}

impl<F> PlaylistObserver for F
where
    F: FnMut(Option<&Clip>) + Send,
{
    fn now_playing(&mut self, clip: Option<&Clip>) {
        self(clip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct Playlist {
    queue: VecDeque<Clip>,
    current: Option<Clip>,
    observers: Vec<(SubscriptionId, Box<dyn PlaylistObserver>)>,
    next_subscription: u64,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer and immediately tells it what is playing.
    pub fn subscribe(&mut self, mut observer: Box<dyn PlaylistObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        observer.now_playing(self.current.as_ref());
        self.observers.push((id, observer));
        id
    }

    /// Returns false if the id was unknown or already removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.len()
    }

    /// Appends clips. An idle playlist starts playing the first one.
    pub fn add(&mut self, clips: impl IntoIterator<Item = Clip>) {
        self.queue.extend(clips);
        if self.current.is_none() && !self.queue.is_empty() {
            self.next();
        }
    }

    /// Queues a clip right after the current one.
    pub fn add_next(&mut self, clip: Clip) {
        self.queue.push_front(clip);
        if self.current.is_none() {
            self.next();
        }
    }

    /// Removes the clip queued right after the current one if it is
    /// `reference`. Nothing is notified: what is playing does not change.
    pub fn withdraw_next(&mut self, reference: &str) -> bool {
        if self.queue.front().is_some_and(|clip| clip.reference == reference) {
            self.queue.pop_front();
            true
        } else {
            false
        }
    }

    /// Advances to the next queued clip and notifies observers.
    pub fn next(&mut self) -> Option<&Clip> {
        self.current = self.queue.pop_front();
        self.notify();
        self.current.as_ref()
    }

    /// Drops every clip. Subscriptions survive.
    pub fn reset(&mut self) {
        self.queue.clear();
        if self.current.take().is_some() {
            self.notify();
        }
    }

    pub fn current(&self) -> Option<&Clip> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    fn notify(&mut self) {
        let current = self.current.as_ref();
        for (_, observer) in self.observers.iter_mut() {
            observer.now_playing(current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<Option<String>>>>, Box<dyn PlaylistObserver>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = move |clip: Option<&Clip>| {
            sink.lock().unwrap().push(clip.map(|c| c.reference.clone()));
        };
        (seen, Box::new(observer))
    }

    #[test]
    fn add_on_idle_playlist_starts_playback() {
        let mut playlist = Playlist::new();
        let (seen, observer) = recorder();
        playlist.subscribe(observer);

        playlist.add([Clip::system("a", false), Clip::system("b", true)]);

        assert_eq!(playlist.current().unwrap().reference, "a");
        assert_eq!(playlist.pending(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![None, Some("a".to_string())]);
    }

    #[test]
    fn next_drains_to_none() {
        let mut playlist = Playlist::new();
        playlist.add([Clip::system("a", false)]);
        assert!(playlist.next().is_none());
        assert!(playlist.is_idle());
    }

    #[test]
    fn add_next_jumps_the_queue() {
        let mut playlist = Playlist::new();
        playlist.add([Clip::system("a", false), Clip::system("b", false)]);
        playlist.add_next(Clip::system("smile", true));
        assert_eq!(playlist.next().unwrap().reference, "smile");
    }

    #[test]
    fn withdraw_next_only_takes_a_matching_front_clip() {
        let mut playlist = Playlist::new();
        playlist.add([Clip::system("a", false), Clip::system("b", false)]);
        playlist.add_next(Clip::system("smile", true));

        assert!(!playlist.withdraw_next("b"));
        assert!(playlist.withdraw_next("smile"));
        assert!(!playlist.withdraw_next("smile"));
        assert_eq!(playlist.current().unwrap().reference, "a");
        assert_eq!(playlist.next().unwrap().reference, "b");
    }

    #[test]
    fn subscriptions_survive_reset_and_are_removable() {
        // Arrange
        let mut playlist = Playlist::new();
        let (first, observer_a) = recorder();
        let (second, observer_b) = recorder();
        let a = playlist.subscribe(observer_a);
        playlist.subscribe(observer_b);
        playlist.add([Clip::system("a", false)]);

        // Act
        playlist.reset();
        playlist.add([Clip::system("b", false)]);
        assert!(playlist.unsubscribe(a));
        assert!(!playlist.unsubscribe(a));
        playlist.next();

        // Assert
        assert_eq!(playlist.subscriber_count(), 1);
        assert_eq!(first.lock().unwrap().len(), 4, "initial, a, reset, b");
        assert_eq!(
            *second.lock().unwrap(),
            vec![None, Some("a".into()), None, Some("b".into()), None]
        );
    }

    #[test]
    fn late_subscriber_sees_current_clip() {
        let mut playlist = Playlist::new();
        playlist.add([Clip::question("q1.mp4")]);
        let (seen, observer) = recorder();
        playlist.subscribe(observer);
        assert_eq!(*seen.lock().unwrap(), vec![Some("q1.mp4".to_string())]);
    }
}

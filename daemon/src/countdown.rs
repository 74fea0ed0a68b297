//! Cancellable countdown that gates the start of a session.

use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const TICK: Duration = Duration::from_secs(1);

type FireCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct GateState {
    generation: u64,
    remaining: Option<u32>,
    on_fire: Option<FireCallback>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Clone, Default)]
pub struct CountdownGate {
    state: Arc<Mutex<GateState>>,
}

impl CountdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `seconds` down and then calls `on_fire` once.
    ///
    /// `on_tick` sees the starting value and every remaining value after it,
    /// down to 0. A zero duration fires before returning, with no ticks. Must
    /// be called inside a tokio runtime when `seconds > 0`.
    pub fn begin<T, F>(&self, seconds: u32, on_tick: T, on_fire: F)
    where
        T: Fn(u32) + Send + Sync + 'static,
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        if seconds == 0 {
            on_fire();
            return;
        }

        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.remaining = Some(seconds);
            state.on_fire = Some(Box::new(on_fire));
            on_tick(seconds);
            state.generation
        };

        let gate = self.clone();
        let timer = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + TICK, TICK);
            loop {
                interval.tick().await;
                if let Some(fire) = gate.advance(generation, &on_tick) {
                    fire();
                    break;
                }
                if gate.state.lock().generation != generation {
                    break;
                }
            }
        });

        let mut state = self.state.lock();
        if state.generation == generation && state.remaining.is_some() {
            state.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// One second elapsed. Returns the fire callback once the count reaches 0.
    fn advance<T: Fn(u32)>(&self, generation: u64, on_tick: &T) -> Option<FireCallback> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        let remaining = state.remaining?.saturating_sub(1);
        on_tick(remaining);

        if remaining == 0 {
            state.remaining = None;
            state.timer = None;
            return state.on_fire.take();
        }
        state.remaining = Some(remaining);
        None
    }

    /// Stops a running countdown without firing. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if state.remaining.is_none() {
            return false;
        }
        debug!("Countdown cancelled at {:?}", state.remaining);
        state.generation += 1;
        state.remaining = None;
        state.on_fire = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        true
    }

    pub fn remaining(&self) -> Option<u32> {
        self.state.lock().remaining
    }

    pub fn is_counting(&self) -> bool {
        self.remaining().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn fire_counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = fired.clone();
        (fired, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_fires_immediately_without_ticks() {
        let gate = CountdownGate::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let tick_count = ticks.clone();
        let (fired, on_fire) = fire_counter();

        gate.begin(
            0,
            move |_| {
                tick_count.fetch_add(1, Ordering::SeqCst);
            },
            on_fire,
        );

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert!(!gate.is_counting());
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_fires_once() {
        let gate = CountdownGate::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (fired, on_fire) = fire_counter();

        gate.begin(
            3,
            move |remaining| {
                let _ = tx.send(remaining);
            },
            on_fire,
        );
        assert_eq!(gate.remaining(), Some(3));

        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut seen = Vec::new();
        while let Ok(value) = rx.try_recv() {
            seen.push(value);
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!gate.is_counting());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_countdown_never_fires() {
        let gate = CountdownGate::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (fired, on_fire) = fire_counter();

        gate.begin(
            5,
            move |remaining| {
                let _ = tx.send(remaining);
            },
            on_fire,
        );

        while let Some(remaining) = rx.recv().await {
            if remaining == 3 {
                break;
            }
        }
        assert!(gate.cancel());
        assert!(!gate.cancel());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(gate.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_the_previous_countdown() {
        let gate = CountdownGate::new();
        let (first_fired, first) = fire_counter();
        let (second_fired, second) = fire_counter();

        gate.begin(5, |_| {}, first);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        gate.begin(2, |_| {}, second);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first_fired.load(Ordering::SeqCst), 0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }
}

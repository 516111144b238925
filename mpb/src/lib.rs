use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Multi-Producer Broadcast: any number of producers, every subscriber receives a copy of every message.
///
/// A subscriber only sees messages sent after it subscribed. Subscribers whose receiver has been dropped are pruned
/// on the next broadcast. The dispatch thread ends once the bus and every producer handle are dropped.
pub struct MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    sender: Sender<X>,
    subscribers: Arc<Mutex<Vec<Sender<X>>>>,
}

impl<X> MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<X>();
        let subscribers = Arc::new(Mutex::new(Vec::new()));

        let dispatch_to = subscribers.clone();
        let _ = thread::Builder::new()
            .name("mpb dispatch".to_string())
            .spawn(move || dispatch(receiver, dispatch_to));

        MPB {
            sender,
            subscribers,
        }
    }

    /// A producer handle; it may be cloned and moved to other threads.
    pub fn sender(&self) -> Sender<X> {
        self.sender.clone()
    }

    /// Broadcast `msg` to every current subscriber.
    pub fn send(&self, msg: X) {
        let _ = self.sender.send(msg);
    }

    pub fn subscribe(&self) -> Receiver<X> {
        let (sender, receiver) = unbounded();

        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(poisoned) => poisoned.into_inner().push(sender),
        }

        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(subscribers) => subscribers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl<X> Default for MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch<X: Clone>(receiver: Receiver<X>, subscribers: Arc<Mutex<Vec<Sender<X>>>>) {
    for msg in receiver {
        let mut subscribers = match subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|subscriber| subscriber.send(msg.clone()).is_ok());
    }
}

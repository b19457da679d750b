//! Data-feed bus: transform pipeline + subscriber fan-out.

use crate::device::Device;
use crate::error::Result;
use crate::packet::Packet;

/// An ordered, packet-rewriting stage. Returning `Ok(None)` truncates
/// the chain for that packet without being an error.
pub trait Transform {
    fn receive(&mut self, packet: Packet) -> Result<Option<Packet>>;
}

/// Final consumer of packets post-transform. Captures its own state via
/// closure instead of an explicit `user_data` pointer.
pub type Subscriber = Box<dyn FnMut(&Device, &Packet)>;

#[derive(Default)]
pub struct Bus {
    transforms: Vec<Box<dyn Transform>>,
    subscribers: Vec<Subscriber>,
}

impl Bus {
    pub fn new() -> Bus {
        Bus::default()
    }

    pub fn add_transform(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn add_subscriber(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    pub fn remove_all_subscribers(&mut self) {
        self.subscribers.clear();
    }

    /// Walks `packet` through every transform in registration order,
    /// then broadcasts whatever remains to every subscriber in
    /// registration order. A transform returning "no output" aborts
    /// delivery and is a success, not an error.
    pub fn send(&mut self, device: &Device, packet: Packet) -> Result<()> {
        let mut current = Some(packet);
        for transform in &mut self.transforms {
            let Some(p) = current.take() else {
                break;
            };
            let received = transform.receive(p);
            #[cfg(feature = "log")]
            if let Err(e) = &received {
                log::warn!("transform returned an error: {e}");
            }
            match received? {
                Some(next) => current = Some(next),
                None => {
                    #[cfg(feature = "log")]
                    log::debug!("transform truncated the packet chain");
                    return Ok(());
                }
            }
        }

        if let Some(final_packet) = current {
            for subscriber in &mut self.subscribers {
                subscriber(device, &final_packet);
            }
        }
        Ok(())
    }
}

//! In-memory stand-ins for the bus and the GPIO peripheral, recording every call.

use crate::gpio::{GpioDriver, GpioError, Level, PinId, PinLevel};
use crate::mqtt::{Bus, BusError, BusEvent, ConnectCode, Will};
use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    SetWill(Will),
    Connect,
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
    Disconnect,
}

impl BusCall {
    pub fn publish(topic: &str, payload: &str, retain: bool) -> Self {
        BusCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            retain,
        }
    }
}

#[derive(Default)]
struct BusScript {
    calls: Vec<(Instant, BusCall)>,
    connect_results: VecDeque<Result<ConnectCode, BusError>>,
    fail_publish: bool,
    fail_disconnect: bool,
}

/// Test-side view of a [`FakeBus`]
#[derive(Clone, Default)]
pub struct BusProbe {
    script: Arc<Mutex<BusScript>>,
}

impl BusProbe {
    pub fn script_connects(&self, results: Vec<Result<ConnectCode, BusError>>) {
        self.script.lock().unwrap().connect_results = results.into();
    }

    pub fn fail_publishes(&self) {
        self.script.lock().unwrap().fail_publish = true;
    }

    pub fn fail_disconnect(&self) {
        self.script.lock().unwrap().fail_disconnect = true;
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.timed_calls().into_iter().map(|(_, call)| call).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, BusCall)> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &BusCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.timed_calls()
            .into_iter()
            .filter(|(_, call)| *call == BusCall::Connect)
            .map(|(at, _)| at)
            .collect()
    }

    pub fn publishes_on(&self, topic: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BusCall::Publish {
                    topic: t, payload, ..
                } if t == topic => Some(payload),
                _ => None,
            })
            .collect()
    }
}

/// Scripted [`Bus`]: connect answers come from the probe (default accepted),
/// events come from the returned sender.
pub struct FakeBus {
    script: Arc<Mutex<BusScript>>,
    events: mpsc::UnboundedReceiver<BusEvent>,
    connected: bool,
}

pub fn fake_bus() -> (FakeBus, BusProbe, mpsc::UnboundedSender<BusEvent>) {
    let probe = BusProbe::default();
    let (tx, rx) = mpsc::unbounded_channel();
    let bus = FakeBus {
        script: probe.script.clone(),
        events: rx,
        connected: false,
    };
    (bus, probe, tx)
}

impl FakeBus {
    fn record(&self, call: BusCall) {
        self.script.lock().unwrap().calls.push((Instant::now(), call));
    }
}

#[async_trait]
impl Bus for FakeBus {
    fn set_last_will(&mut self, will: Will) {
        self.record(BusCall::SetWill(will));
    }

    async fn connect(&mut self) -> Result<ConnectCode, BusError> {
        self.record(BusCall::Connect);
        let result = self
            .script
            .lock()
            .unwrap()
            .connect_results
            .pop_front()
            .unwrap_or(Ok(ConnectCode::Accepted));
        self.connected = matches!(result, Ok(ConnectCode::Accepted));
        result
    }

    async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), BusError> {
        self.record(BusCall::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        _qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        self.record(BusCall::publish(topic, payload, retain));
        if self.script.lock().unwrap().fail_publish {
            return Err(BusError::Connection("publish refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        self.record(BusCall::Disconnect);
        self.connected = false;
        if self.script.lock().unwrap().fail_disconnect {
            return Err(BusError::Timeout);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> BusEvent {
        if !self.connected {
            return std::future::pending().await;
        }
        match self.events.recv().await {
            Some(event) => {
                if matches!(event, BusEvent::Disconnected(_)) {
                    self.connected = false;
                }
                event
            }
            None => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct FakeGpio {
    levels: Mutex<HashMap<PinId, Level>>,
    failing: Mutex<HashSet<PinId>>,
    writes: Mutex<Vec<(PinId, Level)>>,
    releases: AtomicUsize,
    fail_release: AtomicBool,
}

impl FakeGpio {
    pub fn with_pins(pins: &[PinId]) -> Self {
        let gpio = FakeGpio::default();
        for pin in pins {
            gpio.configure(*pin, PinLevel::Idle).unwrap();
        }
        gpio
    }

    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.levels.lock().unwrap().get(&pin).copied()
    }

    /// Changes the line behind the bridge's back, like external wiring would
    pub fn set_level(&self, pin: PinId, level: Level) {
        self.levels.lock().unwrap().insert(pin, level);
    }

    pub fn fail_pin(&self, pin: PinId) {
        self.failing.lock().unwrap().insert(pin);
    }

    pub fn fail_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(PinId, Level)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn check(&self, pin: PinId) -> Result<(), GpioError> {
        if self.failing.lock().unwrap().contains(&pin) {
            return Err(GpioError::AccessError {
                pin,
                reason: "simulated failure".into(),
            });
        }
        if !self.levels.lock().unwrap().contains_key(&pin) {
            return Err(GpioError::UnknownPin(pin));
        }
        Ok(())
    }
}

impl GpioDriver for FakeGpio {
    fn configure(&self, pin: PinId, initial: PinLevel) -> Result<(), GpioError> {
        if self.failing.lock().unwrap().contains(&pin) {
            return Err(GpioError::AccessError {
                pin,
                reason: "simulated failure".into(),
            });
        }
        self.levels.lock().unwrap().insert(pin, initial.electrical());
        Ok(())
    }

    fn write(&self, pin: PinId, level: Level) -> Result<(), GpioError> {
        self.check(pin)?;
        self.writes.lock().unwrap().push((pin, level));
        self.levels.lock().unwrap().insert(pin, level);
        Ok(())
    }

    fn read(&self, pin: PinId) -> Result<Level, GpioError> {
        self.check(pin)?;
        self.level(pin).ok_or(GpioError::UnknownPin(pin))
    }

    fn release_all(&self) -> Result<(), GpioError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(GpioError::InitializationError("simulated release failure".into()));
        }
        for level in self.levels.lock().unwrap().values_mut() {
            *level = PinLevel::Idle.electrical();
        }
        Ok(())
    }
}

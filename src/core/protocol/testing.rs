//! In-memory transport used by the engine and handle tests.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::core::bluetooth::transport::{NotificationStream, Transport};
use crate::core::protocol::commands::opcode;
use crate::core::protocol::device_type::DeviceType;
use crate::core::protocol::frame::{self, Frame};
use crate::error::TransportError;

/// Everything the engine did to the transport.
#[derive(Debug, Default)]
pub struct MockLog {
    /// Every write attempt, including failed ones.
    pub writes: Vec<Frame>,
    pub connects: u32,
    pub disconnects: u32,
}

impl MockLog {
    pub fn opcodes(&self) -> Vec<u8> {
        self.writes.iter().map(|frame| frame.command).collect()
    }
}

pub type SharedLog = Arc<Mutex<MockLog>>;

/// Firmware stand-in that reacts to requests the way the appliances do.
#[derive(Debug, Clone)]
pub struct SimulatedAppliance {
    pub device_type: DeviceType,
    pub status: u8,
    pub mode: u8,
    pub target: u8,
    pub temperature: u8,
    pub program: [u8; 8],
    pub timer: (u8, u8),
    pub ionization: bool,
    pub energy: u32,
    pub starts: u16,
    pub colors: [[u8; 3]; 2],
    /// Overrides the AUTH verdict byte.
    pub auth_code: Option<u8>,
}

impl SimulatedAppliance {
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            status: 0x00,
            mode: 0x00,
            target: 0x00,
            temperature: 0x18,
            program: [0; 8],
            timer: (0, 0),
            ionization: false,
            energy: 0,
            starts: 0,
            colors: [[0xff, 0x00, 0x00], [0x00, 0x00, 0xff]],
            auth_code: None,
        }
    }

    /// Payload of the notification answering `request`.
    pub fn respond(&mut self, request: &Frame) -> Vec<u8> {
        let p = &request.payload;
        let arg = |i: usize| p.get(i).copied().unwrap_or(0);

        match request.command {
            opcode::AUTH => vec![
                self.auth_code
                    .unwrap_or(self.device_type.auth_success_code()),
            ],
            opcode::GET_VERSION => vec![0x04, 0x0b],
            opcode::RUN => {
                self.status = 0x02;
                vec![0x01]
            }
            opcode::STOP => {
                self.status = 0x00;
                vec![0x01]
            }
            opcode::SET_MODE if self.device_type.is_cooker() => {
                self.program.copy_from_slice(&p[..8]);
                self.status = 0x01;
                vec![0x01]
            }
            opcode::SET_MODE => {
                self.mode = arg(0);
                self.target = arg(2);
                vec![0x01]
            }
            opcode::GET_STATUS => self.status_payload(),
            opcode::SET_TEMPERATURE => {
                match self.device_type {
                    DeviceType::Fan => self.mode = arg(0),
                    _ => self.program[2] = arg(0),
                }
                vec![0x01]
            }
            opcode::SET_TIMER_COOKER => {
                self.timer = (arg(0), arg(1));
                vec![0x01]
            }
            opcode::SET_IONIZATION => {
                self.ionization = arg(0) == 0x01;
                vec![0x01]
            }
            opcode::SET_COLOR => {
                let target = usize::from(arg(0) == 0x01);
                self.colors[target] = [arg(3), arg(4), arg(5)];
                vec![0x01]
            }
            opcode::GET_COLOR => {
                let [r, g, b] = self.colors[usize::from(arg(0) == 0x01)];
                vec![arg(0), 0x00, 0x5e, r, g, b]
            }
            opcode::SET_SOUND => vec![arg(0)],
            opcode::GET_STATS_ENERGY => {
                let mut payload = vec![0u8; 9];
                payload[6..9].copy_from_slice(&self.energy.to_le_bytes()[..3]);
                payload
            }
            opcode::GET_STATS_STARTS => {
                let mut payload = vec![0u8; 5];
                payload[3..5].copy_from_slice(&self.starts.to_le_bytes());
                payload
            }
            _ => vec![0x01],
        }
    }

    fn status_payload(&self) -> Vec<u8> {
        let mut tokens = [0u8; 20];
        let last = match self.device_type {
            DeviceType::Kettle => {
                tokens[3] = self.mode;
                tokens[5] = self.target;
                tokens[13] = self.temperature;
                13
            }
            DeviceType::BacklitKettle | DeviceType::BacklitKettleB => {
                tokens[3] = self.mode;
                tokens[5] = self.target;
                tokens[8] = self.temperature;
                16
            }
            DeviceType::Fan => {
                tokens[5] = self.mode;
                tokens[14] = u8::from(self.ionization);
                14
            }
            DeviceType::Heater => {
                tokens[3] = self.mode;
                11
            }
            DeviceType::Multicooker => {
                tokens[3..8].copy_from_slice(&self.program[..5]);
                tokens[8] = self.timer.0;
                tokens[9] = self.timer.1;
                tokens[10] = u8::from(self.program[7] == 0);
                11
            }
        };
        tokens[11] = self.status;
        tokens[3..=last].to_vec()
    }
}

/// Scripted [`Transport`] answering every write synchronously.
pub struct MockTransport {
    pub appliance: SimulatedAppliance,
    log: SharedLog,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    /// Index of the write attempt that fails.
    pub fail_write_at: Option<usize>,
    /// Index of the write attempt refused with `NotConnected`.
    pub link_down_at: Option<usize>,
    /// The notify channel closes once this write has been answered.
    pub drop_link_after: Option<usize>,
    /// Number of connect calls that fail before one succeeds.
    pub connect_failures: u32,
    /// Opcodes never answered.
    pub silent: Vec<u8>,
    /// Opcodes answered with a one-byte payload.
    pub truncated: Vec<u8>,
    /// Raw notifications pushed ahead of the next response.
    pub unsolicited: Vec<Vec<u8>>,
}

impl MockTransport {
    pub fn new(device_type: DeviceType) -> (Self, SharedLog) {
        let log = SharedLog::default();
        let transport = Self {
            appliance: SimulatedAppliance::new(device_type),
            log: log.clone(),
            tx: None,
            fail_write_at: None,
            link_down_at: None,
            drop_link_after: None,
            connect_failures: 0,
            silent: Vec::new(),
            truncated: Vec::new(),
            unsolicited: Vec::new(),
        };
        (transport, log)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<NotificationStream, TransportError> {
        self.log.lock().unwrap().connects += 1;
        if self.connect_failures > 0 {
            self.connect_failures -= 1;
            return Err(TransportError::RetriesExhausted {
                attempts: 3,
                last: "device not in range".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        Ok(rx)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let request = Frame::decode(data).map_err(|e| TransportError::Write(e.to_string()))?;
        let index = {
            let mut log = self.log.lock().unwrap();
            log.writes.push(request.clone());
            log.writes.len() - 1
        };
        if self.fail_write_at == Some(index) {
            return Err(TransportError::Write("gatt write rejected".into()));
        }
        if self.link_down_at == Some(index) {
            return Err(TransportError::NotConnected);
        }
        let tx = self.tx.as_ref().ok_or(TransportError::NotConnected)?;

        for raw in self.unsolicited.drain(..) {
            let _ = tx.send(raw);
        }
        if self.silent.contains(&request.command) {
            return Ok(());
        }
        let payload = if self.truncated.contains(&request.command) {
            vec![0x00]
        } else {
            self.appliance.respond(&request)
        };
        let _ = tx.send(frame::encode(request.sequence, request.command, &payload).unwrap());
        if self.drop_link_after == Some(index) {
            self.tx = None;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().disconnects += 1;
        self.tx = None;
        Ok(())
    }
}

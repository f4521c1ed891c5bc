//! Si446x command opcodes and argument layouts.

/// Powers up the chip with the boot options that follow.
pub const POWER_UP: u8 = 0x02;
pub const SET_PROPERTY: u8 = 0x11;
pub const GPIO_PIN_CFG: u8 = 0x13;
/// Resets and reports the TX/RX FIFOs.
pub const FIFO_INFO: u8 = 0x15;
pub const PACKET_INFO: u8 = 0x16;
/// Reads and clears pending interrupt flags.
pub const GET_INT_STATUS: u8 = 0x20;
pub const START_TX: u8 = 0x31;
pub const START_RX: u8 = 0x32;
/// Reads the CTS byte followed by the previous command's response.
pub const READ_CMD_BUFF: u8 = 0x44;
pub const WRITE_TX_FIFO: u8 = 0x66;
pub const READ_RX_FIFO: u8 = 0x77;

/// CTS value once the chip is ready for the next command.
pub const CTS_READY: u8 = 0xFF;

/// Largest packet the FIFO takes in one transmission.
pub const MAX_PACKET_SIZE: usize = 64;

/// `FIFO_INFO` argument bit that clears the TX FIFO.
pub const FIFO_RESET_TX: u8 = 0x01;
/// `FIFO_INFO` argument bit that clears the RX FIFO.
pub const FIFO_RESET_RX: u8 = 0x02;

/// `START_TX` condition: return to READY once the packet is out, start now.
const TX_COMPLETE_READY: u8 = 0x30;

/// `START_RX` next-state arguments: stay in RX after timeout, valid and invalid packets.
const RX_NEXT_STATES: [u8; 3] = [0x08, 0x08, 0x08];

/// Boot normally, external TCXO at 30 MHz.
pub fn power_up() -> Vec<u8> {
    vec![POWER_UP, 0x01, 0x01, 0x01, 0xC9, 0xC3, 0x80]
}

/// GPIO2 mirrors the TX/RX switch state; everything else unchanged.
pub fn gpio_pin_cfg() -> Vec<u8> {
    vec![GPIO_PIN_CFG, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00]
}

/// `INT_CTL_ENABLE`: packet-handler interrupts only.
pub fn int_ctl_enable() -> Vec<u8> {
    vec![SET_PROPERTY, 0x01, 0x01, 0x00, 0x01]
}

/// `INT_CTL_PH_ENABLE`: packet-received only.
pub fn int_ctl_ph_enable() -> Vec<u8> {
    vec![SET_PROPERTY, 0x01, 0x01, 0x01, 0x10]
}

pub fn reset_tx_fifo() -> Vec<u8> {
    vec![FIFO_INFO, FIFO_RESET_TX]
}

pub fn reset_rx_fifo() -> Vec<u8> {
    vec![FIFO_INFO, FIFO_RESET_RX]
}

pub fn write_tx_fifo(packet: &[u8]) -> Vec<u8> {
    let mut cmd = Vec::with_capacity(1 + packet.len());
    cmd.push(WRITE_TX_FIFO);
    cmd.extend_from_slice(packet);
    cmd
}

pub fn start_tx(channel: u8, len: u16) -> Vec<u8> {
    let [hi, lo] = len.to_be_bytes();
    vec![START_TX, channel, TX_COMPLETE_READY, hi, lo, 0x00, 0x00]
}

/// Receive on `channel` with the length taken from the packet itself.
pub fn start_rx(channel: u8) -> Vec<u8> {
    let mut cmd = vec![START_RX, channel, 0x00, 0x00, 0x00];
    cmd.extend_from_slice(&RX_NEXT_STATES);
    cmd
}

/// Clear every pending interrupt.
pub fn get_int_status() -> Vec<u8> {
    vec![GET_INT_STATUS, 0x00, 0x00, 0x00]
}

/// A `READ_CMD_BUFF` transaction that clocks in the CTS byte plus
/// `response_len` response bytes.
///
/// After the transfer, index 1 holds CTS and the response starts at index 2.
pub fn read_cmd_buff(response_len: usize) -> Vec<u8> {
    let mut cmd = vec![0x00; 2 + response_len];
    cmd[0] = READ_CMD_BUFF;
    cmd
}

/// Human-readable name of a command opcode, for logs.
pub fn name(opcode: u8) -> &'static str {
    match opcode {
        POWER_UP => "POWER_UP",
        SET_PROPERTY => "SET_PROPERTY",
        GPIO_PIN_CFG => "GPIO_PIN_CFG",
        FIFO_INFO => "FIFO_INFO",
        PACKET_INFO => "PACKET_INFO",
        GET_INT_STATUS => "GET_INT_STATUS",
        START_TX => "START_TX",
        START_RX => "START_RX",
        READ_CMD_BUFF => "READ_CMD_BUFF",
        WRITE_TX_FIFO => "WRITE_TX_FIFO",
        READ_RX_FIFO => "READ_RX_FIFO",
        _ => "UNKNOWN",
    }
}

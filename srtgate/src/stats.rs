use std::ffi::c_int;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::srt::{srt_bstats, SRTSOCKET, SRT_TRACEBSTATS};

/// A point-in-time snapshot of one SRT socket's trace statistics, flattened
/// into a plain-data record that outlives the socket it was read from.
///
/// `*_total` counters accumulate over the socket's lifetime; the rest cover
/// the interval since the previous snapshot that was taken with
/// `clear_intervals` set.
#[derive(Debug, Default, Clone)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SocketStats {
    pub ms_time_stamp: i64,
    pub pkt_sent_total: i64,
    pub pkt_recv_total: i64,
    pub pkt_sent_unique_total: i64,
    pub pkt_recv_unique_total: i64,
    pub pkt_snd_loss_total: i32,
    pub pkt_rcv_loss_total: i32,
    pub pkt_retrans_total: i32,
    pub pkt_sent_ack_total: i32,
    pub pkt_recv_ack_total: i32,
    pub pkt_sent_nak_total: i32,
    pub pkt_recv_nak_total: i32,
    pub us_snd_duration_total: i64,
    pub pkt_snd_drop_total: i32,
    pub pkt_rcv_drop_total: i32,
    pub pkt_rcv_undecrypt_total: i32,
    pub pkt_snd_filter_extra_total: i32,
    pub pkt_rcv_filter_extra_total: i32,
    pub pkt_rcv_filter_supply_total: i32,
    pub pkt_rcv_filter_loss_total: i32,
    pub byte_sent_total: u64,
    pub byte_recv_total: u64,
    pub byte_sent_unique_total: u64,
    pub byte_recv_unique_total: u64,
    pub byte_rcv_loss_total: u64,
    pub byte_retrans_total: u64,
    pub byte_snd_drop_total: u64,
    pub byte_rcv_drop_total: u64,
    pub byte_rcv_undecrypt_total: u64,
    pub pkt_sent: i64,
    pub pkt_recv: i64,
    pub pkt_sent_unique: i64,
    pub pkt_recv_unique: i64,
    pub pkt_snd_loss: i32,
    pub pkt_rcv_loss: i32,
    pub pkt_retrans: i32,
    pub pkt_rcv_retrans: i32,
    pub pkt_sent_ack: i32,
    pub pkt_recv_ack: i32,
    pub pkt_sent_nak: i32,
    pub pkt_recv_nak: i32,
    pub pkt_snd_filter_extra: i32,
    pub pkt_rcv_filter_extra: i32,
    pub pkt_rcv_filter_supply: i32,
    pub pkt_rcv_filter_loss: i32,
    pub mbps_send_rate: f64,
    pub mbps_recv_rate: f64,
    pub us_snd_duration: i64,
    pub pkt_reorder_distance: i32,
    pub pkt_rcv_belated: i64,
    pub pkt_snd_drop: i32,
    pub pkt_rcv_drop: i32,
}

impl From<SRT_TRACEBSTATS> for SocketStats {
    fn from(trace: SRT_TRACEBSTATS) -> Self {
        Self {
            ms_time_stamp: trace.ms_time_stamp,
            pkt_sent_total: trace.pkt_sent_total,
            pkt_recv_total: trace.pkt_recv_total,
            pkt_sent_unique_total: trace.pkt_sent_unique_total,
            pkt_recv_unique_total: trace.pkt_recv_unique_total,
            pkt_snd_loss_total: trace.pkt_snd_loss_total,
            pkt_rcv_loss_total: trace.pkt_rcv_loss_total,
            pkt_retrans_total: trace.pkt_retrans_total,
            pkt_sent_ack_total: trace.pkt_sent_ack_total,
            pkt_recv_ack_total: trace.pkt_recv_ack_total,
            pkt_sent_nak_total: trace.pkt_sent_nak_total,
            pkt_recv_nak_total: trace.pkt_recv_nak_total,
            us_snd_duration_total: trace.us_snd_duration_total,
            pkt_snd_drop_total: trace.pkt_snd_drop_total,
            pkt_rcv_drop_total: trace.pkt_rcv_drop_total,
            pkt_rcv_undecrypt_total: trace.pkt_rcv_undecrypt_total,
            pkt_snd_filter_extra_total: trace.pkt_snd_filter_extra_total,
            pkt_rcv_filter_extra_total: trace.pkt_rcv_filter_extra_total,
            pkt_rcv_filter_supply_total: trace.pkt_rcv_filter_supply_total,
            pkt_rcv_filter_loss_total: trace.pkt_rcv_filter_loss_total,
            byte_sent_total: trace.byte_sent_total,
            byte_recv_total: trace.byte_recv_total,
            byte_sent_unique_total: trace.byte_sent_unique_total,
            byte_recv_unique_total: trace.byte_recv_unique_total,
            byte_rcv_loss_total: trace.byte_rcv_loss_total,
            byte_retrans_total: trace.byte_retrans_total,
            byte_snd_drop_total: trace.byte_snd_drop_total,
            byte_rcv_drop_total: trace.byte_rcv_drop_total,
            byte_rcv_undecrypt_total: trace.byte_rcv_undecrypt_total,
            pkt_sent: trace.pkt_sent,
            pkt_recv: trace.pkt_recv,
            pkt_sent_unique: trace.pkt_sent_unique,
            pkt_recv_unique: trace.pkt_recv_unique,
            pkt_snd_loss: trace.pkt_snd_loss,
            pkt_rcv_loss: trace.pkt_rcv_loss,
            pkt_retrans: trace.pkt_retrans,
            pkt_rcv_retrans: trace.pkt_rcv_retrans,
            pkt_sent_ack: trace.pkt_sent_ack,
            pkt_recv_ack: trace.pkt_recv_ack,
            pkt_sent_nak: trace.pkt_sent_nak,
            pkt_recv_nak: trace.pkt_recv_nak,
            pkt_snd_filter_extra: trace.pkt_snd_filter_extra,
            pkt_rcv_filter_extra: trace.pkt_rcv_filter_extra,
            pkt_rcv_filter_supply: trace.pkt_rcv_filter_supply,
            pkt_rcv_filter_loss: trace.pkt_rcv_filter_loss,
            mbps_send_rate: trace.mbps_send_rate,
            mbps_recv_rate: trace.mbps_recv_rate,
            us_snd_duration: trace.us_snd_duration,
            pkt_reorder_distance: trace.pkt_reorder_distance,
            pkt_rcv_belated: trace.pkt_rcv_belated,
            pkt_snd_drop: trace.pkt_snd_drop,
            pkt_rcv_drop: trace.pkt_rcv_drop,
        }
    }
}

/// Reads a snapshot for a socket. A retrieval failure yields `None`, never a
/// partially filled record.
pub(crate) fn read_socket_stats(fd: SRTSOCKET, clear_intervals: bool) -> Option<SocketStats> {
    let mut trace = SRT_TRACEBSTATS::default();
    if unsafe { srt_bstats(fd, &mut trace, clear_intervals as c_int) } != 0 {
        return None;
    }

    Some(SocketStats::from(trace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_counters_over_unchanged() {
        let trace = SRT_TRACEBSTATS {
            ms_time_stamp: 1500,
            pkt_sent_total: 42,
            pkt_recv_total: 7,
            byte_sent_total: 61_000,
            pkt_sent: 12,
            pkt_rcv_retrans: 3,
            mbps_send_rate: 2.5,
            pkt_sent_unique_total: 40,
            ..Default::default()
        };

        let stats = SocketStats::from(trace);
        assert_eq!(stats.ms_time_stamp, 1500);
        assert_eq!(stats.pkt_sent_total, 42);
        assert_eq!(stats.pkt_recv_total, 7);
        assert_eq!(stats.byte_sent_total, 61_000);
        assert_eq!(stats.pkt_sent, 12);
        assert_eq!(stats.pkt_rcv_retrans, 3);
        assert_eq!(stats.mbps_send_rate, 2.5);
        assert_eq!(stats.pkt_sent_unique_total, 40);
    }

    #[test]
    fn defaults_are_zeroed() {
        let stats = SocketStats::default();
        assert_eq!(stats.pkt_sent_total, 0);
        assert_eq!(stats.byte_recv_total, 0);
        assert_eq!(stats.mbps_recv_rate, 0.0);
    }
}

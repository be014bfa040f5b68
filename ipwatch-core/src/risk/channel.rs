use serde::Serialize;

use crate::channel::Channel;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelRiskFactors {
    pub infringement_rate: u8,
    pub infringement_volume: u8,
    pub channel_reach: u8,
    pub damage_done: u8,
}

impl ChannelRiskFactors {
    pub fn total(&self) -> u8 {
        let sum = self.infringement_rate as u16
            + self.infringement_volume as u16
            + self.channel_reach as u16
            + self.damage_done as u16;
        sum.min(100) as u8
    }
}

/// 4-factor channel risk (0-100), focused on actual damage to the rights
/// holder: pattern severity, scale, reach, and views on infringing content.
pub fn channel_risk(channel: &Channel) -> (u8, ChannelRiskFactors) {
    if channel.videos_scanned == 0 {
        return (0, ChannelRiskFactors::default());
    }

    let rate = channel.infringement_rate();
    let factors = ChannelRiskFactors {
        infringement_rate: rate_points(rate),
        infringement_volume: volume_points(channel.confirmed_infringements),
        channel_reach: reach_points(channel.subscriber_count),
        damage_done: damage_points((channel.total_views as f64 * rate) as i64),
    };
    (factors.total(), factors)
}

/// Piecewise-linear over the confirmed/scanned ratio. Steep at the low end
/// so even a 10% pattern registers, flat near the top.
fn rate_points(rate: f64) -> u8 {
    let points = if rate <= 0.10 {
        rate * 150.0
    } else if rate <= 0.25 {
        15.0 + (rate - 0.10) * 66.67
    } else if rate <= 0.50 {
        25.0 + (rate - 0.25) * 40.0
    } else if rate <= 0.75 {
        35.0 + (rate - 0.50) * 16.0
    } else {
        39.0 + (rate - 0.75) * 4.0
    };
    (points.round() as u8).min(40)
}

fn volume_points(confirmed: i64) -> u8 {
    if confirmed <= 2 {
        6
    } else if confirmed <= 5 {
        12
    } else if confirmed <= 10 {
        18
    } else if confirmed <= 20 {
        23
    } else if confirmed <= 40 {
        27
    } else {
        30
    }
}

fn reach_points(subscribers: i64) -> u8 {
    if subscribers >= 1_000_000 {
        20
    } else if subscribers >= 500_000 {
        17
    } else if subscribers >= 100_000 {
        14
    } else if subscribers >= 50_000 {
        11
    } else if subscribers >= 10_000 {
        8
    } else if subscribers >= 1_000 {
        4
    } else {
        0
    }
}

fn damage_points(infringing_views: i64) -> u8 {
    if infringing_views >= 10_000_000 {
        10
    } else if infringing_views >= 5_000_000 {
        9
    } else if infringing_views >= 1_000_000 {
        8
    } else if infringing_views >= 500_000 {
        6
    } else if infringing_views >= 100_000 {
        4
    } else if infringing_views >= 10_000 {
        2
    } else {
        0
    }
}

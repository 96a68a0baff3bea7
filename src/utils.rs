//!
//! Small utility functions
//!

/// Generate the team IP
///
/// Team 4533 talks to a roboRIO at `10.45.33.2`:
///
/// ```text
///  4  5  3  3
///  |__|  |__|
///     \  /
///  10.45.33.2
/// ```
///
/// Reference:
/// <https://docs.wpilib.org/en/stable/docs/networking/networking-introduction/ip-configurations.html#te-am-ip-notation>
pub fn gen_team_ip(team_number: u16) -> Option<[u8; 4]> {
    if team_number > 25_599 {
        None
    } else {
        Some([10, (team_number / 100) as u8, (team_number % 100) as u8, 2])
    }
}

/// Parse the index out of a V4L2 device path like `/dev/video2`
pub fn video_index(device: &str) -> Option<i32> {
    device
        .strip_prefix("/dev/video")
        .and_then(|idx| idx.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_ips() {
        assert_eq!(gen_team_ip(4533), Some([10, 45, 33, 2]));
        assert_eq!(gen_team_ip(12345), Some([10, 123, 45, 2]));
        assert_eq!(gen_team_ip(7), Some([10, 0, 7, 2]));
        assert_eq!(gen_team_ip(25_600), None);
    }

    #[test]
    fn video_indices() {
        assert_eq!(video_index("/dev/video2"), Some(2));
        assert_eq!(video_index("/dev/video10"), Some(10));
        assert_eq!(video_index("/dev/media0"), None);
        assert_eq!(video_index("/dev/video"), None);
    }
}

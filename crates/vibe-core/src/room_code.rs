use rand::Rng;

use crate::ids::RoomId;

pub const ROOM_CODE_LEN: usize = 6;
/// Uppercase letters and digits without the easily confused `I`, `O`, `0`, `1`.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a short, human-typable room code.
pub fn generate_room_code() -> RoomId {
    let mut rng = rand::thread_rng();
    let code: String = (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect();
    RoomId::from_trusted(code)
}

/// Generate a code not rejected by `taken`, giving up after `attempts` tries.
pub fn generate_unique_room_code(
    attempts: usize,
    taken: impl Fn(&RoomId) -> bool,
) -> Option<RoomId> {
    (0..attempts).map(|_| generate_room_code()).find(|code| !taken(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_has_expected_shape() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert_eq!(code.as_str().len(), ROOM_CODE_LEN);
            assert!(code.as_str().bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)), "got: {code}");
        }
    }

    #[test]
    fn unique_code_skips_taken() {
        let code = generate_unique_room_code(8, |_| false);
        assert!(code.is_some());
        assert!(generate_unique_room_code(8, |_| true).is_none());
    }
}

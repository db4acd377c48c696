use anyhow::{Result, bail};
use rand::Rng;

// ── Dice rolls ────────────────────────────────────────────────────────────────

/// Parse a `"<N>d<S>"` dice expression (e.g. "2d6") into (count, sides).
/// Case-insensitive. Rejects zero dice and zero-sided dice.
pub fn parse_dice(spec: &str) -> Result<(u32, u32)> {
    let lower = spec.to_ascii_lowercase();
    let Some((num, sides)) = lower.split_once('d') else {
        bail!("invalid dice roll format: {spec}");
    };
    let num: u32 = num
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid number of dice: {num}"))?;
    let sides: u32 = sides
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid dice sides: {sides}"))?;
    if num == 0 || sides == 0 {
        bail!("dice roll must use at least 1 die with 1 side: {spec}");
    }
    Ok((num, sides))
}

/// Roll a `"<N>d<S>"` expression and return the summed result.
pub fn roll_dice(spec: &str) -> Result<u32> {
    let (num, sides) = parse_dice(spec)?;
    let mut rng = rand::thread_rng();
    let sum = (0..num).map(|_| rng.gen_range(1..=sides)).sum();
    Ok(sum)
}

// ── File content checks ───────────────────────────────────────────────────────

/// NUL-byte heuristic, same as git's binary detection.
pub fn is_binary(contents: &[u8]) -> bool {
    contents.contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dice() {
        assert_eq!(parse_dice("2d6").unwrap(), (2, 6));
        assert_eq!(parse_dice("1D20").unwrap(), (1, 20));
        assert!(parse_dice("d6").is_err());
        assert!(parse_dice("2d").is_err());
        assert!(parse_dice("banana").is_err());
        assert!(parse_dice("0d6").is_err());
        assert!(parse_dice("2d0").is_err());
    }

    #[test]
    fn test_roll_dice_in_range() {
        for _ in 0..50 {
            let roll = roll_dice("3d4").unwrap();
            assert!((3..=12).contains(&roll), "roll {roll} out of range");
        }
    }

    #[test]
    fn test_is_binary() {
        assert!(!is_binary(b"plain text\n"));
        assert!(is_binary(b"ELF\x00\x01"));
    }
}

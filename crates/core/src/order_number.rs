//! Order-number checksum validation (Luhn).

/// Validate an externally supplied order number.
///
/// The number must consist solely of decimal digits, be at least two digits
/// long, and pass the Luhn checksum: doubling every second digit from the
/// right (subtracting 9 when the doubled value exceeds 9), the digit sum must
/// be divisible by 10.
pub fn is_valid(id: &str) -> bool {
    let mut digits = Vec::with_capacity(id.len());
    for ch in id.chars() {
        match ch.to_digit(10) {
            Some(d) => digits.push(d),
            None => return false,
        }
    }

    if digits.len() < 2 {
        return false;
    }

    let mut sum = 0u32;
    let mut double = false;
    for &d in digits.iter().rev() {
        let mut d = d;
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }

    sum % 10 == 0
}

/// Tolerance applied before flooring so values like 599.4 / 0.01 do not land one tick low
pub const EPSILON: f64 = 1e-9;

/// Floor a price to a multiple of `tick_size`
pub fn floor_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size <= 0.0 {
        return price;
    }
    (price / tick_size + EPSILON).floor() * tick_size
}

/// Round to a fixed number of decimal places
pub fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Render a value with exactly `decimals` decimal places
pub fn format_decimals(value: f64, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, value)
}

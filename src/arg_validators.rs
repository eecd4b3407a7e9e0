use crate::color_ops;

pub(crate) fn validate_min_share_percent(value: &str) -> Result<f64, String> {
    let num = value
        .parse::<f64>()
        .map_err(|_| "Not a valid floating point number".to_string())?;
    if !(0.0..=100.0).contains(&num) {
        return Err("Number must be between 0 and 100".to_string());
    }
    Ok(num)
}

pub(crate) fn validate_positive_count(value: &str) -> Result<usize, String> {
    let num = value
        .parse::<usize>()
        .map_err(|_| "Not a valid whole number".to_string())?;
    if num == 0 {
        return Err("Number must be greater than 0".to_string());
    }
    Ok(num)
}

pub(crate) fn validate_positive_dimension(value: &str) -> Result<u32, String> {
    let num = value
        .parse::<u32>()
        .map_err(|_| "Not a valid whole number".to_string())?;
    if num == 0 {
        return Err("Number must be greater than 0".to_string());
    }
    Ok(num)
}

/// Accept anything the color parser understands, normalized to #RRGGBB
pub(crate) fn validate_chroma_key_color(value: &str) -> Result<String, String> {
    match color_ops::parse_color(value) {
        Ok(color) => Ok(format!("#{:02X}{:02X}{:02X}", color[0], color[1], color[2])),
        Err(e) => Err(e.to_string()),
    }
}

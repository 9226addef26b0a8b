//! Global histogram equalization for 8-bit grayscale buffers.

/// 256-bin intensity histogram.
pub fn histogram(gray: &[u8]) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for &p in gray {
        hist[p as usize] += 1;
    }
    hist
}

/// Equalize the intensity histogram in-place.
///
/// Builds the cumulative distribution and remaps every pixel through
/// `lut[v] = round((cdf[v] - cdf_min) * 255 / (N - cdf_min))`, where
/// `cdf_min` is the count of the darkest occupied bin. A buffer holding a
/// single intensity is left unchanged.
pub fn equalize_histogram(gray: &mut [u8]) {
    let total = gray.len() as u64;
    if total == 0 {
        return;
    }

    let hist = histogram(gray);
    let cdf_min = hist.iter().find(|&&c| c > 0).copied().unwrap_or(0) as u64;
    let denom = total - cdf_min;
    if denom == 0 {
        return;
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u64;
    for (v, &count) in hist.iter().enumerate() {
        cumulative += count as u64;
        let mapped = (cumulative.saturating_sub(cdf_min) as f64 * 255.0 / denom as f64).round();
        lut[v] = mapped.clamp(0.0, 255.0) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}

#[allow(unused_imports)]
use {
    crate::error::{Error, Result, TrapBug},
    log::{debug, error, info, log, trace, warn},
};

pub fn fill_random(buf: &mut [u8]) -> Result<(), Error> {
    getrandom::getrandom(buf).map_err(|e| {
        error!("RNG failed: {e}");
        Error::msg("RNG failed")
    })
}

pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut r = [0u8; N];
    fill_random(&mut r)?;
    Ok(r)
}

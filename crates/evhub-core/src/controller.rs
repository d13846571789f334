// Evhub Controller Numbers
// Reusable pool of small integers identifying connected game controllers

use log::info;

/// Highest controller number handed out.
pub const MAX_CONTROLLERS: u32 = 32;

/// Controller numbers `1..=MAX_CONTROLLERS`; 0 means "no controller number".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerNumbers {
    used: u32,
}

impl ControllerNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest free number, or 0 when every number is taken.
    pub fn allocate(&mut self, device_name: &str) -> i32 {
        if self.is_full() {
            info!(
                "Maximum number of controllers reached, assigning controller number 0 to device {}",
                device_name
            );
            return 0;
        }
        let index = (!self.used).trailing_zeros();
        self.used |= 1 << index;
        index as i32 + 1
    }

    /// Return a number to the pool. Releasing 0 or a free number is a no-op.
    pub fn release(&mut self, number: i32) {
        if (1..=MAX_CONTROLLERS as i32).contains(&number) {
            self.used &= !(1 << (number - 1));
        }
    }

    pub fn is_full(&self) -> bool {
        self.used == u32::MAX
    }

    pub fn in_use(&self) -> u32 {
        self.used.count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free() {
        let mut pool = ControllerNumbers::new();
        assert_eq!(pool.allocate("a"), 1);
        assert_eq!(pool.allocate("b"), 2);
        assert_eq!(pool.allocate("c"), 3);
        pool.release(2);
        assert_eq!(pool.allocate("d"), 2);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn test_full_pool_returns_zero() {
        let mut pool = ControllerNumbers::new();
        for expected in 1..=MAX_CONTROLLERS as i32 {
            assert_eq!(pool.allocate("pad"), expected);
        }
        assert!(pool.is_full());
        assert_eq!(pool.allocate("extra"), 0);
        pool.release(17);
        assert_eq!(pool.allocate("extra"), 17);
    }

    #[test]
    fn test_release_ignores_out_of_range() {
        let mut pool = ControllerNumbers::new();
        pool.allocate("pad");
        pool.release(0);
        pool.release(33);
        pool.release(-1);
        assert_eq!(pool.in_use(), 1);
    }
}

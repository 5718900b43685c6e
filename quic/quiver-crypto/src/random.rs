// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use ring::rand::{SecureRandom, SystemRandom};

/// ring-backed secure randomness for connection IDs, reset tokens, and
/// path challenges.
#[derive(Clone, Debug)]
pub struct Random {
    rng: SystemRandom,
}

impl Default for Random {
    fn default() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl quiver_core::random::Generator for Random {
    fn public_random_fill(&mut self, dest: &mut [u8]) {
        // SystemRandom only fails if the OS entropy source is broken
        self.rng.fill(dest).expect("system random source failed");
    }

    fn private_random_fill(&mut self, dest: &mut [u8]) {
        self.rng.fill(dest).expect("system random source failed");
    }
}

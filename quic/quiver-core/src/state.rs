// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Small state machine helpers.
//!
//! `is!` generates a predicate over one or more enum variants. `event!`
//! generates a transition method which either moves the state to the
//! target or reports the attempt as invalid/no-op, letting callers decide
//! whether an unexpected event is a protocol error.

use core::fmt;

pub type Result<T> = core::result::Result<(), Error<T>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error<T> {
    /// The event does not apply to the current state
    InvalidTransition { current: T, event: &'static str },
    /// The state is already the transition target
    NoOp { current: T },
}

impl<T: fmt::Debug> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidTransition { current, event } => {
                write!(f, "invalid event {event:?} for state {current:?}")
            }
            Self::NoOp { current } => write!(f, "state is already {current:?}"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for Error<T> {}

#[macro_export]
macro_rules! is {
    ($(#[doc = $doc:literal])* $function:ident, $($state:ident)|+) => {
        $(#[doc = $doc])*
        #[inline]
        pub fn $function(&self) -> bool {
            matches!(self, $(Self::$state)|*)
        }
    };
}

#[macro_export]
macro_rules! transition {
    ($state:ident, $event:ident, [$($valid:pat),*] => $target:expr) => {{
        let target = $target;
        if matches!($state, $($valid)|*) {
            *$state = target;
            Ok(())
        } else if target.eq($state) {
            Err($crate::state::Error::NoOp {
                current: $state.clone(),
            })
        } else {
            Err($crate::state::Error::InvalidTransition {
                current: $state.clone(),
                event: stringify!($event),
            })
        }
    }};
}

#[macro_export]
macro_rules! event {
    ($(
        $(#[doc = $doc:literal])*
        $event:ident ($($valid:ident)|+ => $target:ident);
    )*) => {
        $(
            $(#[doc = $doc])*
            #[inline]
            pub fn $event(&mut self) -> $crate::state::Result<Self> {
                $crate::transition!(self, $event, [$(Self::$valid),*] => Self::$target)
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    enum Light {
        #[default]
        Red,
        Green,
        Yellow,
    }

    impl Light {
        is!(is_red, Red);
        is!(is_stoppable, Red | Yellow);

        event! {
            on_go(Red => Green);
            on_slow(Green => Yellow);
            on_stop(Yellow => Red);
        }
    }

    #[test]
    fn transition_test() {
        let mut light = Light::default();
        assert!(light.is_red());
        light.on_go().unwrap();
        assert!(!light.is_red());
        light.on_slow().unwrap();
        assert!(light.is_stoppable());

        // an invalid event reports the current state
        assert!(matches!(
            light.on_go(),
            Err(crate::state::Error::InvalidTransition { .. })
        ));

        // a repeated event is a no-op, not an invalid transition
        light.on_stop().unwrap();
        assert!(matches!(
            light.on_stop(),
            Err(crate::state::Error::NoOp { .. })
        ));
    }
}

// Copyright 2026 the lenstrace developers and collaborators
// Licensed under the GPL version 3.

//! One-dimensional numerical integration.
//!
//! A small builder in front of the rules of the `quadrature` crate:
//!
//! ```
//! use lenstrace::quad::{qag, IntegrationRule};
//!
//! let r = qag(|x| x * x, 0., 3.)
//!     .tolerance(0., 1e-10)
//!     .rule(IntegrationRule::ClenshawCurtis)
//!     .compute();
//! assert!((r.value - 9.).abs() < 1e-8);
//! ```

use quadrature::{clenshaw_curtis, double_exponential};


/// The quadrature rule to use.
#[derive(Clone,Copy,Debug,Eq,Hash,PartialEq)]
pub enum IntegrationRule {
    /// Tanh-sinh (double exponential) quadrature.
    DoubleExponential,

    /// Clenshaw-Curtis quadrature. Good for smooth integrands.
    ClenshawCurtis,
}


/// The outcome of an integration.
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct IntegrationResult {
    /// The estimated value of the integral.
    pub value: f64,

    /// An estimate of the absolute error.
    pub abserr: f64,

    /// False if the rule gave up before reaching the requested tolerance.
    pub converged: bool,
}


/// Accumulates the parameters of an integration before running it.
pub struct IntegrationBuilder<F> where F: Fn(f64) -> f64 {
    function: F,
    lower_bound: f64,
    upper_bound: f64,
    epsabs: f64,
    epsrel: f64,
    rule: IntegrationRule,
}


/// Integrate `f` over the finite interval `[lower, upper]`.
pub fn qag<F>(f: F, lower: f64, upper: f64) -> IntegrationBuilder<F> where F: Fn(f64) -> f64 {
    IntegrationBuilder {
        function: f,
        lower_bound: lower,
        upper_bound: upper,
        epsabs: 0.,
        epsrel: 1e-8,
        rule: IntegrationRule::DoubleExponential,
    }
}


impl<F> IntegrationBuilder<F> where F: Fn(f64) -> f64 {
    /// Set the absolute and relative error targets. The looser of the two
    /// applies.
    pub fn tolerance(mut self, epsabs: f64, epsrel: f64) -> Self {
        self.epsabs = epsabs;
        self.epsrel = epsrel;
        self
    }

    /// Choose the quadrature rule.
    pub fn rule(mut self, rule: IntegrationRule) -> Self {
        self.rule = rule;
        self
    }

    /// The integral over `a < b` and its error estimate.
    fn integrate(&self, a: f64, b: f64, target: f64) -> (f64, f64) {
        let f = &self.function;

        match self.rule {
            IntegrationRule::DoubleExponential => {
                let out = double_exponential::integrate(f, a, b, target);
                (out.integral, out.error_estimate)
            },
            IntegrationRule::ClenshawCurtis => {
                let out = clenshaw_curtis::integrate(f, a, b, target);
                (out.integral, out.error_estimate)
            },
        }
    }

    /// Run the integration.
    pub fn compute(self) -> IntegrationResult {
        let (mut a, mut b) = (self.lower_bound, self.upper_bound);

        if a == b {
            return IntegrationResult { value: 0., abserr: 0., converged: true };
        }

        let sign = if a > b {
            std::mem::swap(&mut a, &mut b);
            -1.
        } else {
            1.
        };

        // The rules only take an absolute target, so a coarse pass sets the
        // scale for the relative one.
        let coarse = self.integrate(a, b, self.epsabs.max(1e-6));
        let target = self.epsabs.max(self.epsrel * coarse.0.abs());

        let (value, abserr) = if target < coarse.1 {
            self.integrate(a, b, target)
        } else {
            coarse
        };

        IntegrationResult {
            value: sign * value,
            abserr: abserr,
            converged: abserr <= target,
        }
    }
}

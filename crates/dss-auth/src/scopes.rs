//! OAuth scope vocabulary and the accepted scope sets per endpoint group.
//!
//! A token satisfies an endpoint iff it presents at least one accepted
//! set in full.

pub const READ_ISA: &str = "dss.read.identification_service_areas";
pub const WRITE_ISA: &str = "dss.write.identification_service_areas";
pub const STRATEGIC_COORDINATION: &str = "utm.strategic_coordination";
pub const CONSTRAINT_MANAGEMENT: &str = "utm.constraint_management";
pub const CONSTRAINT_PROCESSING: &str = "utm.constraint_processing";
pub const CONFORMANCE_MONITORING_SA: &str = "utm.conformance_monitoring_sa";
pub const AVAILABILITY_ARBITRATION: &str = "utm.availability_arbitration";

pub const RID_READ: &[&[&str]] = &[&[READ_ISA]];
pub const RID_WRITE: &[&[&str]] = &[&[WRITE_ISA]];

pub const INTENT_ACCESS: &[&[&str]] = &[&[STRATEGIC_COORDINATION]];
pub const CONSTRAINT_WRITE: &[&[&str]] = &[&[CONSTRAINT_MANAGEMENT]];
pub const CONSTRAINT_READ: &[&[&str]] = &[&[CONSTRAINT_MANAGEMENT], &[CONSTRAINT_PROCESSING]];
pub const SCD_SUBSCRIPTION_ACCESS: &[&[&str]] =
    &[&[STRATEGIC_COORDINATION], &[CONSTRAINT_PROCESSING]];

pub const AVAILABILITY_READ: &[&[&str]] = &[
    &[STRATEGIC_COORDINATION],
    &[CONFORMANCE_MONITORING_SA],
    &[AVAILABILITY_ARBITRATION],
];
pub const AVAILABILITY_WRITE: &[&[&str]] = &[&[AVAILABILITY_ARBITRATION]];

pub const REPORT_ACCESS: &[&[&str]] = &[
    &[STRATEGIC_COORDINATION],
    &[CONSTRAINT_MANAGEMENT],
    &[CONSTRAINT_PROCESSING],
    &[CONFORMANCE_MONITORING_SA],
    &[AVAILABILITY_ARBITRATION],
];

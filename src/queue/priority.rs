//! Payload-derived default priorities. Smaller numbers are serviced first, so
//! cheap jobs are not starved behind expensive ones of the same kind.

use crate::models::{DocumentFormat, JobPayload};

/// Priority for kinds without a cost model
pub const NORMAL_PRIORITY: i32 = 3;

const MEDIA_BASE: i32 = 1;
const MEDIA_RESIZE_COST: i32 = 2;
const MEDIA_WATERMARK_COST: i32 = 5;
const MEDIA_TAG_COST: i32 = 10;

const DELIVERY_URGENT: i32 = 1;
const DELIVERY_NORMAL: i32 = 5;

/// Default priority for `payload` given the attempts already made
pub fn default_priority(payload: &JobPayload, attempts_made: u32) -> i32 {
    match payload {
        JobPayload::Media(job) => {
            let mut priority = MEDIA_BASE;
            // Each operation kind is charged once however often it repeats
            if job.has_operation("resize") {
                priority += MEDIA_RESIZE_COST;
            }
            if job.has_operation("watermark") {
                priority += MEDIA_WATERMARK_COST;
            }
            if job.has_operation("tag") {
                priority += MEDIA_TAG_COST;
            }
            priority
        }
        JobPayload::Document(job) => match job.format {
            DocumentFormat::Csv => 1,
            DocumentFormat::Spreadsheet => 3,
            DocumentFormat::Pdf => 5,
        },
        JobPayload::Delivery(job) => {
            let remaining = i64::from(job.max_retries) - i64::from(attempts_made);
            if remaining <= 1 {
                DELIVERY_URGENT
            } else {
                DELIVERY_NORMAL
            }
        }
        JobPayload::Notification(_) | JobPayload::Workflow(_) => NORMAL_PRIORITY,
    }
}

/*
 * Meeting Scribe - Summarization Prompts
 * Copyright (c) 2025 Meeting Scribe Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

//! Prompt templates for the recursive summarization stage. Level 0 works
//! on raw transcript text; level N consolidates previous summaries.

pub const LEVEL_0_SYSTEM_MESSAGE: &str = "You are an expert at summarizing meeting transcripts. \
Extract key topics, decisions, and action items concisely.";

pub const LEVEL_N_SYSTEM_MESSAGE: &str = "You are an expert at summarizing summaries of meeting \
transcripts. Create a concise overview that preserves the most important information from \
multiple summaries.";

pub fn level_0_user_content(chunk_number: usize, total_chunks: usize, chunk_text: &str) -> String {
    format!(
        "Summarize this meeting transcript section (part {} of {}).\n\
         Provide a 200-500 word summary covering:\n\
         - Main topics discussed\n\
         - Key points and decisions for each topic discussed\n\
         - Important action items\n\
         - Notable speakers/perspectives\n\n\
         Transcript:\n{}",
        chunk_number, total_chunks, chunk_text
    )
}

pub fn level_n_user_content(chunk_number: usize, total_chunks: usize, chunk_text: &str) -> String {
    format!(
        "Create a consolidated summary from this summary section (part {} of {}).\n\
         Provide a 200-500 word overview that combines and preserves the most important \
         information:\n\n\
         Summary section:\n{}",
        chunk_number, total_chunks, chunk_text
    )
}

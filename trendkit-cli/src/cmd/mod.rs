// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod cli;
pub mod rev_list;
pub mod rev_list_ui;
pub mod ui;
pub mod upload_results;
pub mod upload_results_ui;
